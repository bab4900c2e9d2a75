//! Transport layer module.

pub mod mock;
pub mod netlink;
pub mod replay;
pub mod traits;

pub use mock::MockTransport;
pub use netlink::NetlinkTransport;
pub use replay::{RecordingTransport, ReplayTransport};
pub use traits::{Transport, TransportError, TransportKind};
