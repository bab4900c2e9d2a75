//! Protocol module - netlink, generic netlink and devlink wire format.

pub mod attr;
pub mod constants;
pub mod header;
pub mod message;

pub use attr::{
    AttrIter, AttrWriter, Attribute, CtrlAttr, DevlinkAttr, ExtAckAttr, McastGroup, RawAttr,
    VersionKind, decode_attrs,
};
pub use constants::*;
pub use header::{CodecError, GenlMsgHdr, NlMsgHdr};
pub use message::{AckPayload, Message, NlFrame, NlFrames, done_frame};
