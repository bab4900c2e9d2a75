//! Devlink device record.
//!
//! A [`DevlinkDevice`] is one `bus/dev` devlink instance. `INFO_GET`
//! responses are turned into a [`VersionTable`], which is reconciled against
//! the device's child [`Component`]s: components without a running or
//! stored version are pruned, the rest are created or updated in place.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::DevlinkConfig;
use crate::directory::ParentDevice;
use crate::error::{DevlinkError, ResultExt};
use crate::events::{DeviceHandle, DevlinkEvent, DevlinkObserver, ProgressSink, TracingObserver};
use crate::flash::{self, FlashOrchestrator, FlashRequest};
use crate::protocol::{
    DEVLINK_CMD_INFO_GET, DEVLINK_CMD_RELOAD, DEVLINK_RELOAD_ACTION_FW_ACTIVATE, DevlinkAttr,
    Message, VersionKind,
};
use crate::record::{EventEntry, MemoryEventStore};
use crate::rpc;
use crate::search_path::{
    FirmwareFile, FirmwareSearchPath, KernelSearchPathLocker, ensure_firmware_dir,
    firmware_file_name,
};
use crate::socket::{GenlSocket, SocketMode};

/// Version strings reported for one component name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// Static identification (ASIC id, board id, ...), not a firmware version.
    pub fixed: Option<String>,
    pub running: Option<String>,
    /// Flashed but not yet activated.
    pub stored: Option<String>,
}

impl VersionInfo {
    /// Version to surface: stored if present, else running.
    pub fn current(&self) -> Option<&str> {
        self.stored.as_deref().or(self.running.as_deref())
    }

    pub fn needs_activation(&self) -> bool {
        matches!((&self.stored, &self.running), (Some(s), Some(r)) if s != r)
    }
}

/// Versions by component name, sorted.
pub type VersionTable = BTreeMap<String, VersionInfo>;

/// Collect the `INFO_VERSION_*` groups of an `INFO_GET` response.
pub fn version_table(msg: &Message<DevlinkAttr>) -> VersionTable {
    let mut table = VersionTable::new();
    for attr in &msg.attrs {
        if let DevlinkAttr::Version { kind, name, value } = attr {
            let info = table.entry(name.clone()).or_default();
            let slot = match kind {
                VersionKind::Fixed => &mut info.fixed,
                VersionKind::Running => &mut info.running,
                VersionKind::Stored => &mut info.stored,
            };
            *slot = Some(value.clone());
        }
    }
    table
}

/// `DEVLINK\DRIVER_<driver>&<NAME>_<fixed>...` over the fixed versions, in
/// name order.
pub fn identity_string(driver: Option<&str>, table: &VersionTable) -> String {
    let mut parts = Vec::new();
    if let Some(driver) = driver {
        parts.push(format!("DRIVER_{driver}"));
    }
    for (name, info) in table {
        if let Some(fixed) = &info.fixed {
            parts.push(format!("{}_{}", name.to_ascii_uppercase(), fixed));
        }
    }
    format!("DEVLINK\\{}", parts.join("&"))
}

/// One flashable firmware component of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub version: String,
    pub needs_activation: bool,
    pub instance_ids: Vec<String>,
    /// Fixed versions from the configured sets, keyed by upper-cased name.
    pub instance_strs: BTreeMap<String, String>,
    /// Configured sets whose every fixed version was reported.
    pub instance_keys: Vec<Vec<String>>,
}

/// Whether the device talks to the kernel, records while doing so, or
/// replays a recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceMode {
    #[default]
    Live,
    Record,
    Emulated,
}

/// Hooks invoked by the device lifecycle owner.
pub trait DeviceLifecycle {
    fn open(&mut self) -> Result<(), DevlinkError>;
    fn close(&mut self) -> Result<(), DevlinkError>;
    fn setup(&mut self) -> Result<(), DevlinkError>;
    fn reload(&mut self) -> Result<(), DevlinkError> {
        self.setup()
    }
    fn prepare(&mut self) -> Result<(), DevlinkError>;
    fn cleanup(&mut self) -> Result<(), DevlinkError>;
    fn write_firmware(
        &mut self,
        firmware: &[u8],
        component: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DevlinkError>;
    fn activate(&mut self, component: &str) -> Result<(), DevlinkError>;
}

/// Serialized device with its recorded exchanges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "GType", default)]
    pub gtype: String,
    #[serde(rename = "BusName", default, skip_serializing_if = "Option::is_none")]
    pub bus_name: Option<String>,
    #[serde(rename = "DevName", default, skip_serializing_if = "Option::is_none")]
    pub dev_name: Option<String>,
    #[serde(rename = "Events", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventEntry>,
}

const SNAPSHOT_GTYPE: &str = "FuDevlinkDevice";
const QUIRK_FIXED_VERSIONS: &str = "DevlinkFixedVersions";
const BOOTLOADER_COMPONENT: &str = "fw.bootloader";

pub struct DevlinkDevice {
    bus_name: Option<String>,
    dev_name: Option<String>,
    physical_id: Option<String>,
    backend_id: Option<String>,
    name: Option<String>,
    summary: Option<String>,
    parent_id: Option<String>,
    vendor_id: u16,
    device_id: u16,
    serial: Option<String>,
    driver: Option<String>,
    identity: Option<String>,
    instance_ids: Vec<String>,
    version_bootloader: Option<String>,
    components: Vec<Component>,
    fixed_versions: Vec<Vec<String>>,
    mode: DeviceMode,
    events: Arc<MemoryEventStore>,
    socket: Option<GenlSocket>,
    monitor: Option<GenlSocket>,
    search_path: Option<Box<dyn FirmwareSearchPath>>,
    firmware_class_path: PathBuf,
    firmware_dir: PathBuf,
    observer: Arc<dyn DevlinkObserver>,
}

impl Default for DevlinkDevice {
    fn default() -> Self {
        let config = DevlinkConfig::default();
        Self {
            bus_name: None,
            dev_name: None,
            physical_id: None,
            backend_id: None,
            name: None,
            summary: None,
            parent_id: None,
            vendor_id: 0,
            device_id: 0,
            serial: None,
            driver: None,
            identity: None,
            instance_ids: Vec::new(),
            version_bootloader: None,
            components: Vec::new(),
            fixed_versions: Vec::new(),
            mode: DeviceMode::Live,
            events: Arc::new(MemoryEventStore::new()),
            socket: None,
            monitor: None,
            search_path: None,
            firmware_class_path: config.firmware_class_path.clone(),
            firmware_dir: config.firmware_dir(),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl DevlinkDevice {
    pub fn new(bus_name: &str, dev_name: &str) -> Self {
        Self {
            bus_name: Some(bus_name.to_string()),
            dev_name: Some(dev_name.to_string()),
            physical_id: Some(format!("{bus_name}/{dev_name}")),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: DeviceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DevlinkObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Take firmware paths and fixed version sets from `config`.
    pub fn apply_config(&mut self, config: &DevlinkConfig) {
        self.firmware_class_path = config.firmware_class_path.clone();
        self.firmware_dir = config.firmware_dir();
        for set in config.fixed_version_sets() {
            self.add_fixed_versions(set);
        }
    }

    pub fn add_fixed_versions(&mut self, names: Vec<String>) {
        self.fixed_versions.push(names);
    }

    /// Apply a device quirk. Only `DevlinkFixedVersions` is understood.
    pub fn set_quirk_kv(&mut self, key: &str, value: &str) -> Result<(), DevlinkError> {
        if key == QUIRK_FIXED_VERSIONS {
            self.add_fixed_versions(value.split(',').map(str::to_string).collect());
            return Ok(());
        }
        Err(DevlinkError::NotSupported("quirk key not supported".into()))
    }

    pub fn bus_name(&self) -> Option<&str> {
        self.bus_name.as_deref()
    }

    pub fn dev_name(&self) -> Option<&str> {
        self.dev_name.as_deref()
    }

    /// The `bus/dev` pair, or `NotSupported` while either is unset.
    pub fn handle(&self) -> Result<DeviceHandle, DevlinkError> {
        match (&self.bus_name, &self.dev_name) {
            (Some(bus), Some(dev)) => Ok(DeviceHandle::new(bus.as_str(), dev.as_str())),
            _ => Err(DevlinkError::NotSupported(
                "devlink device not properly initialized".into(),
            )),
        }
    }

    pub fn physical_id(&self) -> Option<&str> {
        self.physical_id.as_deref()
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.backend_id.as_deref()
    }

    pub fn set_backend_id(&mut self, id: impl Into<String>) {
        self.backend_id = Some(id.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn set_vendor_ids(&mut self, vendor_id: u16, device_id: u16) {
        self.vendor_id = vendor_id;
        self.device_id = device_id;
    }

    /// Attach to `parent`, copying its vendor identity.
    pub fn set_parent(&mut self, parent: &ParentDevice) {
        self.parent_id = Some(parent.id.clone());
        self.set_vendor_ids(parent.vendor_id, parent.device_id);
    }

    /// Registry id of the parent device, once attached.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Identity string derived from the driver and fixed versions.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn instance_ids(&self) -> &[String] {
        &self.instance_ids
    }

    pub fn version_bootloader(&self) -> Option<&str> {
        self.version_bootloader.as_deref()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Recorded (or to-be-replayed) exchanges.
    pub fn events(&self) -> &Arc<MemoryEventStore> {
        &self.events
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Use an already connected socket instead of opening one.
    pub fn attach_socket(&mut self, socket: GenlSocket) {
        self.socket = Some(socket);
    }

    /// Watch flash progress on `socket` instead of opening a monitor socket
    /// for every flash. It must already be subscribed to the `config` group.
    pub fn attach_monitor(&mut self, socket: GenlSocket) {
        self.monitor = Some(socket);
    }

    pub fn socket_mode(&self) -> SocketMode {
        match self.mode {
            DeviceMode::Live => SocketMode::Live,
            DeviceMode::Record => SocketMode::Record(self.events.clone()),
            DeviceMode::Emulated => SocketMode::Emulated(self.events.clone()),
        }
    }

    fn socket_mut(&mut self) -> Result<&mut GenlSocket, DevlinkError> {
        self.socket
            .as_mut()
            .ok_or_else(|| DevlinkError::Internal("devlink socket not open".into()))
    }

    fn info_request(socket: &GenlSocket, handle: &DeviceHandle) -> Message<DevlinkAttr> {
        socket
            .devlink_request(DEVLINK_CMD_INFO_GET, false)
            .with_attr(DevlinkAttr::BusName(handle.bus_name.clone()))
            .with_attr(DevlinkAttr::DevName(handle.dev_name.clone()))
    }

    /// Query `INFO_GET` and apply the response.
    #[instrument(skip(self), fields(device = ?self.physical_id))]
    pub fn refresh(&mut self) -> Result<(), DevlinkError> {
        let handle = self.handle()?;
        let socket = self.socket_mut()?;
        let request = Self::info_request(socket, &handle);

        let mut replies = Vec::new();
        rpc::send_recv(socket, request, |msg| {
            if msg.cmd() == DEVLINK_CMD_INFO_GET {
                replies.push(msg.clone());
            }
            Ok(())
        })
        .context("failed to get device info")?;

        if replies.is_empty() {
            debug!("No device info in response");
        }
        for msg in &replies {
            self.apply_info(msg);
        }
        Ok(())
    }

    /// Apply one `INFO_GET` response: serial number, driver, identity and,
    /// when fixed versions are present, the component set.
    pub fn apply_info(&mut self, msg: &Message<DevlinkAttr>) {
        for attr in &msg.attrs {
            match attr {
                DevlinkAttr::SerialNumber(serial) => self.serial = Some(serial.clone()),
                DevlinkAttr::DriverName(driver) => self.driver = Some(driver.clone()),
                _ => {}
            }
        }

        let table = version_table(msg);
        let identity = identity_string(self.driver.as_deref(), &table);
        // A changed identity replaces the stale one.
        if let Some(previous) = self.identity.take().filter(|p| *p != identity) {
            self.instance_ids.retain(|id| *id != previous);
        }
        if !self.instance_ids.contains(&identity) {
            self.instance_ids.push(identity.clone());
        }
        self.identity = Some(identity);

        if !table.values().any(|v| v.fixed.is_some()) {
            warn!(
                device = ?self.physical_id,
                "No fixed versions reported, components left untouched"
            );
            return;
        }
        self.reconcile(&table);
    }

    fn reconcile(&mut self, table: &VersionTable) {
        if let Some(fixed) = table.get(BOOTLOADER_COMPONENT).and_then(|v| v.fixed.clone()) {
            self.version_bootloader = Some(fixed);
        }

        let mut removed = Vec::new();
        self.components.retain(|c| {
            let keep = table.get(&c.name).is_some_and(|v| v.current().is_some());
            if !keep {
                removed.push(c.name.clone());
            }
            keep
        });
        for name in removed {
            debug!(component = %name, "Removed component");
            self.observer.on_event(&DevlinkEvent::ComponentRemoved { name });
        }

        for (name, info) in table {
            let Some(version) = info.current() else {
                continue;
            };
            let needs_activation = info.needs_activation();

            if let Some(component) = self.components.iter_mut().find(|c| &c.name == name) {
                if component.version != version || component.needs_activation != needs_activation {
                    component.version = version.to_string();
                    component.needs_activation = needs_activation;
                    self.observer.on_event(&DevlinkEvent::ComponentUpdated {
                        name: name.clone(),
                        version: version.to_string(),
                        needs_activation,
                    });
                }
                continue;
            }

            let component = self.new_component(name, version, needs_activation, table);
            self.observer.on_event(&DevlinkEvent::ComponentAdded {
                name: name.clone(),
                version: version.to_string(),
            });
            self.components.push(component);
        }
    }

    fn new_component(
        &self,
        name: &str,
        version: &str,
        needs_activation: bool,
        table: &VersionTable,
    ) -> Component {
        let mut instance_strs = BTreeMap::new();
        let mut instance_keys = Vec::new();

        for names in &self.fixed_versions {
            let mut keys = Vec::with_capacity(names.len());
            let mut complete = true;
            for fixed_name in names {
                match table.get(fixed_name).and_then(|v| v.fixed.as_ref()) {
                    Some(fixed) => {
                        let key = fixed_name.to_ascii_uppercase();
                        instance_strs
                            .entry(key.clone())
                            .or_insert_with(|| fixed.clone());
                        keys.push(key);
                    }
                    None => complete = false,
                }
            }
            if complete {
                instance_keys.push(keys);
            }
        }

        Component {
            name: name.to_string(),
            version: version.to_string(),
            needs_activation,
            instance_ids: vec![format!("DEVLINK\\COMPONENT_{name}")],
            instance_strs,
            instance_keys,
        }
    }

    /// Reload with `fw_activate` if `component` has a stored version that
    /// differs from the running one.
    #[instrument(skip(self), fields(device = ?self.physical_id))]
    pub fn ensure_activate(&mut self, component: &str) -> Result<(), DevlinkError> {
        let handle = self.handle()?;
        let socket = self.socket_mut()?;
        let request = Self::info_request(socket, &handle);

        let mut needs_activation = false;
        rpc::send_recv(socket, request, |msg| {
            if msg.cmd() == DEVLINK_CMD_INFO_GET {
                if let Some(info) = version_table(msg).get(component) {
                    needs_activation = info.needs_activation();
                }
            }
            Ok(())
        })
        .context("failed to get device info")?;

        if !needs_activation {
            debug!("No activation needed");
            return Ok(());
        }

        self.observer.on_event(&DevlinkEvent::ActivationStarted {
            handle: handle.clone(),
        });
        let socket = self.socket_mut()?;
        let request = socket
            .devlink_request(DEVLINK_CMD_RELOAD, false)
            .with_attr(DevlinkAttr::BusName(handle.bus_name.clone()))
            .with_attr(DevlinkAttr::DevName(handle.dev_name.clone()))
            .with_attr(DevlinkAttr::ReloadAction(DEVLINK_RELOAD_ACTION_FW_ACTIVATE));
        rpc::send(socket, request).context("failed to send devlink reload command")?;

        debug!(device = %handle, "Firmware activation completed");
        Ok(())
    }

    /// Flash `firmware` to `component`, then activate it if needed.
    /// With `omit_component_name` the driver picks the component itself.
    pub fn write_firmware_component(
        &mut self,
        component: &str,
        omit_component_name: bool,
        firmware: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DevlinkError> {
        let flash_component = (!omit_component_name).then_some(component);
        self.flash_image(flash_component, firmware, progress)?;
        self.ensure_activate(component)
    }

    fn flash_image(
        &mut self,
        component: Option<&str>,
        firmware: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DevlinkError> {
        let handle = self.handle()?;
        let dir = self
            .search_path
            .as_ref()
            .map(|p| p.path().to_path_buf())
            .ok_or_else(|| DevlinkError::Internal("firmware search path not prepared".into()))?;

        let name = firmware_file_name(&handle.bus_name, &handle.dev_name, component);
        let file = FirmwareFile::create(&dir, &name, firmware)?;
        let request = FlashRequest::new(handle.clone(), component.map(str::to_string), file.file_name());

        self.observer.on_event(&DevlinkEvent::FlashStarted {
            handle: handle.clone(),
            component: request.component.clone(),
            file_name: request.file_name.clone(),
        });
        let attached = self.monitor.take();
        let keep_monitor = attached.is_some();
        let mut monitor = match attached {
            Some(monitor) => monitor,
            None => FlashOrchestrator::new(self.socket_mode()).open_monitor()?,
        };
        let result = self
            .socket_mut()
            .and_then(|socket| flash::run_with_monitor(socket, &mut monitor, &request, progress));
        if keep_monitor {
            self.monitor = Some(monitor);
        }
        drop(file);
        result?;

        self.observer
            .on_event(&DevlinkEvent::FlashComplete { handle });
        Ok(())
    }

    pub fn to_snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            gtype: SNAPSHOT_GTYPE.to_string(),
            bus_name: self.bus_name.clone(),
            dev_name: self.dev_name.clone(),
            events: self.events.to_entries(),
        }
    }

    pub fn to_json(&self) -> Result<String, DevlinkError> {
        serde_json::to_string_pretty(&self.to_snapshot())
            .map_err(|e| DevlinkError::InvalidData(e.to_string()))
    }

    /// Emulated device replaying the snapshot's events.
    pub fn from_snapshot(snapshot: &DeviceSnapshot) -> Result<Self, DevlinkError> {
        let (Some(bus_name), Some(dev_name)) = (&snapshot.bus_name, &snapshot.dev_name) else {
            return Err(DevlinkError::InvalidData(
                "BusName and DevName required for devlink device".into(),
            ));
        };
        let events = MemoryEventStore::from_entries(&snapshot.events)
            .map_err(|e| DevlinkError::InvalidData(format!("invalid event data: {e}")))?;

        let id = format!("{bus_name}/{dev_name}");
        let mut device = Self::new(bus_name, dev_name).with_mode(DeviceMode::Emulated);
        device.events = Arc::new(events);
        device.name = Some(id.clone());
        device.backend_id = Some(id);
        Ok(device)
    }

    pub fn from_json(json: &str) -> Result<Self, DevlinkError> {
        let snapshot: DeviceSnapshot =
            serde_json::from_str(json).map_err(|e| DevlinkError::InvalidData(e.to_string()))?;
        Self::from_snapshot(&snapshot)
    }

    /// Copy the bus and device names from `donor` where unset.
    pub fn incorporate(&mut self, donor: &DevlinkDevice) {
        if self.bus_name.is_none() {
            self.bus_name = donor.bus_name.clone();
        }
        if self.dev_name.is_none() {
            self.dev_name = donor.dev_name.clone();
        }
    }
}

impl DeviceLifecycle for DevlinkDevice {
    fn open(&mut self) -> Result<(), DevlinkError> {
        self.socket = Some(GenlSocket::open(&self.socket_mode())?);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DevlinkError> {
        self.socket = None;
        self.monitor = None;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), DevlinkError> {
        let handle = self.handle()?;
        self.summary = Some(format!("Devlink device ({handle})"));

        if self.vendor_id != 0 && self.device_id != 0 {
            let instance_id = format!(
                "{}\\VEN_{:04X}&DEV_{:04X}",
                handle.bus_name.to_ascii_uppercase(),
                self.vendor_id,
                self.device_id
            );
            if !self.instance_ids.contains(&instance_id) {
                self.instance_ids.push(instance_id);
            }
        }

        self.refresh()?;
        info!(
            device = %handle,
            components = self.components.len(),
            "Device set up"
        );
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), DevlinkError> {
        ensure_firmware_dir(&self.firmware_dir)?;
        let locker = KernelSearchPathLocker::new(&self.firmware_class_path, &self.firmware_dir)?;
        self.search_path = Some(Box::new(locker));
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), DevlinkError> {
        self.search_path = None;
        Ok(())
    }

    fn write_firmware(
        &mut self,
        firmware: &[u8],
        component: Option<&str>,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DevlinkError> {
        match component {
            Some(component) => self.write_firmware_component(component, false, firmware, progress),
            None => self.flash_image(None, firmware, progress),
        }
    }

    fn activate(&mut self, component: &str) -> Result<(), DevlinkError> {
        self.ensure_activate(component)
    }
}

impl fmt::Debug for DevlinkDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevlinkDevice")
            .field("bus_name", &self.bus_name)
            .field("dev_name", &self.dev_name)
            .field("mode", &self.mode)
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, key: &str, value: Option<&str>) -> fmt::Result {
    match value {
        Some(value) => writeln!(f, "  {key:<18}{value}"),
        None => Ok(()),
    }
}

impl fmt::Display for DevlinkDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.physical_id.as_deref().unwrap_or("devlink device"))?;
        write_field(f, "BusName:", self.bus_name())?;
        write_field(f, "DevName:", self.dev_name())?;
        write_field(f, "Summary:", self.summary())?;
        write_field(f, "Driver:", self.driver())?;
        write_field(f, "Serial:", self.serial())?;
        write_field(f, "Bootloader:", self.version_bootloader())?;
        for id in &self.instance_ids {
            write_field(f, "InstanceId:", Some(id))?;
        }
        for component in &self.components {
            let flag = if component.needs_activation {
                " (needs activation)"
            } else {
                ""
            };
            writeln!(f, "  {:<18}{}{}", component.name, component.version, flag)?;
        }
        Ok(())
    }
}
