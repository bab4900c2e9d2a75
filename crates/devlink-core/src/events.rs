//! Event system for UI decoupling.
//!
//! Device and directory changes are published to a [`DevlinkObserver`];
//! flash progress goes to a [`ProgressSink`] through a [`ProgressTracker`],
//! which keeps the reported percentage from ever going backwards.

use std::fmt;

/// Events emitted while managing devlink devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevlinkEvent {
    /// A device was registered in the directory.
    DeviceAdded { bus_name: String, dev_name: String },
    /// A device was deregistered.
    DeviceRemoved { bus_name: String, dev_name: String },
    ComponentAdded { name: String, version: String },
    ComponentUpdated {
        name: String,
        version: String,
        needs_activation: bool,
    },
    ComponentRemoved { name: String },
    /// A flash-update command is about to be sent.
    FlashStarted {
        handle: DeviceHandle,
        component: Option<String>,
        file_name: String,
    },
    /// Firmware activation (reload with `fw_activate`) was requested.
    ActivationStarted { handle: DeviceHandle },
    FlashComplete { handle: DeviceHandle },
}

/// `bus/dev` pair naming one devlink instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    pub bus_name: String,
    pub dev_name: String,
}

impl DeviceHandle {
    pub fn new(bus_name: impl Into<String>, dev_name: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            dev_name: dev_name.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bus_name, self.dev_name)
    }
}

/// Observer trait for receiving devlink events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DevlinkObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DevlinkEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DevlinkObserver for NullObserver {
    fn on_event(&self, _event: &DevlinkEvent) {}
}

/// Receives flash progress. Only ever called from the thread running the
/// flash event loop.
pub trait ProgressSink {
    fn set_percentage(&mut self, percentage: u8);

    /// Free-form status text reported by the driver.
    fn set_status(&mut self, _message: &str) {}
}

/// Observer and progress sink that logs using tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DevlinkObserver for TracingObserver {
    fn on_event(&self, event: &DevlinkEvent) {
        match event {
            DevlinkEvent::DeviceAdded { bus_name, dev_name } => {
                tracing::info!(bus = %bus_name, dev = %dev_name, "Device added");
            }
            DevlinkEvent::DeviceRemoved { bus_name, dev_name } => {
                tracing::info!(bus = %bus_name, dev = %dev_name, "Device removed");
            }
            DevlinkEvent::ComponentAdded { name, version } => {
                tracing::debug!(component = %name, version = %version, "Added component");
            }
            DevlinkEvent::ComponentUpdated {
                name,
                version,
                needs_activation,
            } => {
                tracing::debug!(
                    component = %name,
                    version = %version,
                    needs_activation,
                    "Updated component"
                );
            }
            DevlinkEvent::ComponentRemoved { name } => {
                tracing::debug!(component = %name, "Removed component");
            }
            DevlinkEvent::FlashStarted {
                handle,
                component,
                file_name,
            } => {
                tracing::info!(
                    device = %handle,
                    component = component.as_deref().unwrap_or("default"),
                    file = %file_name,
                    "Flash update started"
                );
            }
            DevlinkEvent::ActivationStarted { handle } => {
                tracing::info!(device = %handle, "Activating firmware");
            }
            DevlinkEvent::FlashComplete { handle } => {
                tracing::info!(device = %handle, "Flash update complete");
            }
        }
    }
}

impl ProgressSink for TracingObserver {
    fn set_percentage(&mut self, percentage: u8) {
        tracing::info!(progress = %format!("{}%", percentage), "Flashing");
    }

    fn set_status(&mut self, message: &str) {
        tracing::debug!(status = %message, "Flash status");
    }
}

/// Percentage for `done` of `total` bytes, `None` while the total is unknown.
pub fn percentage(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (u128::from(done.min(total)) * 100) / u128::from(total);
    Some(pct as u8)
}

/// Forwards progress to a sink, never reporting a lower value than before.
pub struct ProgressTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    last: Option<u8>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink, last: None }
    }

    /// Report `percentage`, clamped to 100 and to the last reported value.
    /// Returns the value actually reported, if any.
    pub fn set_percentage(&mut self, percentage: u8) -> Option<u8> {
        let pct = percentage.min(100);
        if let Some(last) = self.last {
            if pct <= last {
                return None;
            }
        }
        self.last = Some(pct);
        self.sink.set_percentage(pct);
        Some(pct)
    }

    pub fn set_fraction(&mut self, done: u64, total: u64) -> Option<u8> {
        percentage(done, total).and_then(|pct| self.set_percentage(pct))
    }

    pub fn set_status(&mut self, message: &str) {
        self.sink.set_status(message);
    }

    pub fn finish(&mut self) {
        self.set_percentage(100);
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
