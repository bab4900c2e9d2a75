//! Devlink-Core: firmware updates for Linux devlink devices in Rust.
//!
//! This crate talks to the kernel's `devlink` generic netlink family to
//! enumerate devices, read their firmware versions and flash new images
//! while following the driver's progress notifications.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Netlink/generic netlink headers, attributes and messages
//! - **Transport**: Datagram transports (netlink socket, recording, replay, mock)
//! - **Socket**: Family resolution and multicast subscription
//! - **RPC**: Request/response dispatch with kernel error reports
//! - **Flash**: Flash-update command with concurrent progress monitoring
//! - **Device**: Version reconciliation, activation and lifecycle hooks
//! - **Directory**: Device registry fed by enumeration and notifications
//! - **Record**: Event transcripts for record and replay
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::{DeviceLifecycle, DevlinkConfig, DeviceDirectory, GenlSocket, SocketMode};
//!
//! let mut directory = DeviceDirectory::new(DevlinkConfig::default());
//! let mut socket = GenlSocket::open(&SocketMode::Live).expect("no devlink");
//! directory.enumerate(&mut socket).expect("enumeration failed");
//!
//! for device in directory.iter_mut() {
//!     device.open().expect("open failed");
//!     device.setup().expect("setup failed");
//!     println!("{device}");
//! }
//! ```

pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod events;
pub mod flash;
pub mod protocol;
pub mod record;
pub mod rpc;
pub mod search_path;
pub mod socket;
pub mod transport;

// Re-exports for convenience
pub use config::DevlinkConfig;
pub use device::{Component, DeviceLifecycle, DeviceMode, DeviceSnapshot, DevlinkDevice, VersionInfo};
pub use directory::{DeviceDirectory, ParentDevice};
pub use error::{DevlinkError, ErrorKind};
pub use events::{
    DeviceHandle, DevlinkEvent, DevlinkObserver, NullObserver, ProgressSink, TracingObserver,
};
pub use flash::{FlashOrchestrator, FlashRequest};
pub use record::{EventKey, EventStore, MemoryEventStore};
pub use rpc::ErrorReport;
pub use socket::{GenlSocket, SocketMode};
pub use transport::{MockTransport, NetlinkTransport, Transport, TransportError, TransportKind};
