//! Netlink transport layer abstraction.
//!
//! Defines the `Transport` trait for datagram exchange with the kernel,
//! allowing different implementations (live socket, recording, replay, mock).

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::record::EventKey;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{op} failed: {source}")]
    Syscall {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Short send: sent {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },

    #[error("Generic netlink family '{0}' not found")]
    FamilyNotFound(String),

    #[error("Multicast group '{0}' not found")]
    McastGroupNotFound(String),

    #[error("No recorded event for {0}")]
    EventNotFound(EventKey),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub(crate) fn syscall(op: &'static str) -> Self {
        TransportError::Syscall {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

/// How a transport reaches the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Live,
    Recording,
    Replay,
    Mock,
}

/// Abstract datagram transport.
///
/// Each transport owns exactly one receive buffer. `recv` hands out a slice
/// of it, so a second receive cannot start while the previous datagram is
/// still borrowed.
pub trait Transport: Send {
    /// Send one request datagram. `key` identifies the exchange for
    /// transports that record or replay it.
    fn send(&mut self, key: &EventKey, datagram: &[u8]) -> Result<(), TransportError>;

    /// Block for the next response datagram of the current exchange.
    /// `Ok(None)` means no more data (zero-length read or exhausted replay).
    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError>;

    /// Non-blocking read of an unsolicited datagram. `Ok(None)` means
    /// nothing is queued right now.
    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError>;

    /// Join a multicast group.
    fn join_multicast(&mut self, group: u32) -> Result<(), TransportError>;

    /// Descriptor that becomes readable when a multicast datagram arrives.
    fn poll_fd(&self) -> RawFd;

    fn kind(&self) -> TransportKind;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, key: &EventKey, datagram: &[u8]) -> Result<(), TransportError> {
        (**self).send(key, datagram)
    }

    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        (**self).recv()
    }

    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        (**self).try_recv_multicast()
    }

    fn join_multicast(&mut self, group: u32) -> Result<(), TransportError> {
        (**self).join_multicast(group)
    }

    fn poll_fd(&self) -> RawFd {
        (**self).poll_fd()
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }
}

/// `recv(2)` into `buf`, retrying on `EINTR`. Returns `Ok(None)` on
/// `EAGAIN` when `flags` contains `MSG_DONTWAIT`.
pub(crate) fn recv_fd(fd: RawFd, buf: &mut [u8], flags: i32) -> Result<Option<usize>, TransportError> {
    loop {
        // SAFETY: buf is valid for writes of buf.len() bytes for the whole call.
        let ret = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), flags) };
        if ret >= 0 {
            return Ok(Some(ret as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(TransportError::Syscall { op: "recv", source: err }),
        }
    }
}
