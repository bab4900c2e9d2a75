//! Registry of devlink devices keyed by `bus/dev`.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::DevlinkConfig;
use crate::device::{DeviceMode, DevlinkDevice};
use crate::error::{DevlinkError, ResultExt};
use crate::events::{DevlinkEvent, DevlinkObserver, TracingObserver};
use crate::protocol::{DEVLINK_CMD_DEL, DEVLINK_CMD_GET, DEVLINK_CMD_NEW, DevlinkAttr, Message};
use crate::rpc;
use crate::socket::GenlSocket;

/// Vendor identity of the device a devlink instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentDevice {
    pub id: String,
    pub name: Option<String>,
    pub vendor_id: u16,
    pub device_id: u16,
}

/// All netdevsim instances share one synthetic parent.
const NETDEVSIM_PARENT: &str = "netdevsim";

/// Registry id of the parent of `bus/dev`.
pub fn parent_id(bus_name: &str, dev_name: &str) -> String {
    match bus_name {
        "netdevsim" => NETDEVSIM_PARENT.to_string(),
        _ => format!("{bus_name}/{dev_name}"),
    }
}

/// Resolve the parent of `bus/dev`: PCI devices from sysfs, netdevsim
/// instances synthesized.
pub fn resolve_parent(
    sysfs_root: &Path,
    bus_name: &str,
    dev_name: &str,
) -> Result<ParentDevice, DevlinkError> {
    match bus_name {
        "pci" => {
            let path = sysfs_root.join("bus/pci/devices").join(dev_name);
            if !path.exists() {
                return Err(DevlinkError::NotFound(format!(
                    "PCI device {dev_name} not found in sysfs"
                )));
            }
            Ok(ParentDevice {
                id: parent_id(bus_name, dev_name),
                name: None,
                vendor_id: read_sysfs_id(&path.join("vendor"))?,
                device_id: read_sysfs_id(&path.join("device"))?,
            })
        }
        "netdevsim" => Ok(ParentDevice {
            id: parent_id(bus_name, dev_name),
            name: Some(NETDEVSIM_PARENT.to_string()),
            vendor_id: 0,
            device_id: 0,
        }),
        other => Err(DevlinkError::NotSupported(format!(
            "devlink bus '{other}' not supported"
        ))),
    }
}

/// Parse a sysfs id attribute such as `0x15b3`.
fn read_sysfs_id(path: &Path) -> Result<u16, DevlinkError> {
    let content =
        fs::read_to_string(path).map_err(|e| DevlinkError::from(e).context(format!("failed to read {}", path.display())))?;
    let value = content.trim();
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u16::from_str_radix(digits, 16).map_err(|_| {
        DevlinkError::InvalidData(format!("invalid id '{value}' in {}", path.display()))
    })
}

/// Devices discovered on the devlink bus, plus the parents they hang off.
pub struct DeviceDirectory {
    config: DevlinkConfig,
    mode: DeviceMode,
    devices: BTreeMap<String, DevlinkDevice>,
    parents: BTreeMap<String, ParentDevice>,
    observer: Arc<dyn DevlinkObserver>,
}

impl DeviceDirectory {
    pub fn new(config: DevlinkConfig) -> Self {
        Self {
            config,
            mode: DeviceMode::Live,
            devices: BTreeMap::new(),
            parents: BTreeMap::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Mode given to every device created from now on.
    pub fn with_mode(mut self, mode: DeviceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DevlinkObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &DevlinkConfig {
        &self.config
    }

    /// Register `bus/dev` under its parent, registering the parent first if
    /// needed. An already registered id is returned unchanged.
    #[instrument(skip(self))]
    pub fn device_added(
        &mut self,
        bus_name: &str,
        dev_name: &str,
    ) -> Result<&mut DevlinkDevice, DevlinkError> {
        let id = format!("{bus_name}/{dev_name}");
        match self.devices.entry(id) {
            Entry::Occupied(entry) => {
                debug!(device = %entry.key(), "Device already registered");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let parent = match self.parents.entry(parent_id(bus_name, dev_name)) {
                    Entry::Occupied(parent) => parent.into_mut(),
                    Entry::Vacant(slot) => {
                        let parent = resolve_parent(&self.config.sysfs_root, bus_name, dev_name)?;
                        debug!(parent = %parent.id, "Registered parent device");
                        slot.insert(parent)
                    }
                };
                let mut device = DevlinkDevice::new(bus_name, dev_name)
                    .with_mode(self.mode)
                    .with_observer(self.observer.clone());
                device.apply_config(&self.config);
                device.set_backend_id(entry.key().clone());
                device.set_parent(parent);

                self.observer.on_event(&DevlinkEvent::DeviceAdded {
                    bus_name: bus_name.to_string(),
                    dev_name: dev_name.to_string(),
                });
                Ok(entry.insert(device))
            }
        }
    }

    /// Insert a device built elsewhere, e.g. from a snapshot.
    pub fn insert(&mut self, device: DevlinkDevice) -> Result<&mut DevlinkDevice, DevlinkError> {
        let handle = device.handle()?;
        let id = handle.to_string();
        self.devices.insert(id.clone(), device);
        self.devices
            .get_mut(&id)
            .ok_or_else(|| DevlinkError::Internal(format!("device {id} vanished")))
    }

    /// Deregister `bus/dev`. Unknown ids are ignored. A parent left without
    /// children is dropped as well.
    pub fn device_removed(&mut self, bus_name: &str, dev_name: &str) {
        let id = format!("{bus_name}/{dev_name}");
        let Some(device) = self.devices.remove(&id) else {
            return;
        };
        if let Some(parent) = device.parent_id() {
            if !self.devices.values().any(|d| d.parent_id() == Some(parent)) {
                debug!(parent = %parent, "Dropped parent device");
                self.parents.remove(parent);
            }
        }
        self.observer.on_event(&DevlinkEvent::DeviceRemoved {
            bus_name: bus_name.to_string(),
            dev_name: dev_name.to_string(),
        });
    }

    /// Dump `DEVLINK_CMD_GET` and register every instance returned. Devices
    /// that cannot be added are logged and skipped.
    #[instrument(skip_all)]
    pub fn enumerate(&mut self, socket: &mut GenlSocket) -> Result<usize, DevlinkError> {
        let mut found = Vec::new();
        let request = socket.devlink_request(DEVLINK_CMD_GET, true);
        rpc::send_recv(socket, request, |msg| {
            if let (Some(bus), Some(dev)) = (msg.bus_name(), msg.dev_name()) {
                found.push((bus.to_string(), dev.to_string()));
            }
            Ok(())
        })
        .context("failed to enumerate devlink devices")?;

        let mut added = 0;
        for (bus, dev) in &found {
            match self.device_added(bus, dev) {
                Ok(_) => added += 1,
                Err(e) => warn!(bus = %bus, dev = %dev, error = %e, "Skipping devlink device"),
            }
        }
        debug!(found = found.len(), added, "Enumeration finished");
        Ok(added)
    }

    /// Apply a `NEW` / `DEL` notification from the `config` group. Other
    /// commands are ignored.
    pub fn handle_notification(
        &mut self,
        msg: &Message<DevlinkAttr>,
    ) -> Result<(), DevlinkError> {
        let (Some(bus), Some(dev)) = (msg.bus_name(), msg.dev_name()) else {
            return Ok(());
        };
        match msg.cmd() {
            DEVLINK_CMD_NEW => self.device_added(bus, dev).map(|_| ()),
            DEVLINK_CMD_DEL => {
                self.device_removed(bus, dev);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn get(&self, bus_name: &str, dev_name: &str) -> Option<&DevlinkDevice> {
        self.devices.get(&format!("{bus_name}/{dev_name}"))
    }

    pub fn get_mut(&mut self, bus_name: &str, dev_name: &str) -> Option<&mut DevlinkDevice> {
        self.devices.get_mut(&format!("{bus_name}/{dev_name}"))
    }

    pub fn parent(&self, id: &str) -> Option<&ParentDevice> {
        self.parents.get(id)
    }

    pub fn parents(&self) -> impl Iterator<Item = &ParentDevice> {
        self.parents.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DevlinkDevice> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DevlinkDevice> {
        self.devices.values_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
