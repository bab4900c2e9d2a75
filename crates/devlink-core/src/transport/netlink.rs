//! Live `AF_NETLINK` transport.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, instrument, trace};

use super::traits::{Transport, TransportError, TransportKind, recv_fd};
use crate::protocol::constants::{
    NETLINK_ADD_MEMBERSHIP, NETLINK_CAP_ACK, NETLINK_EXT_ACK, NETLINK_GENERIC, SOCKET_BUFFER_SIZE,
    SOL_NETLINK,
};
use crate::record::EventKey;

/// Receive buffer size: the larger of the page size and libmnl's default.
pub(crate) fn receive_buffer_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        (page as usize).max(SOCKET_BUFFER_SIZE)
    } else {
        SOCKET_BUFFER_SIZE
    }
}

/// A bound `NETLINK_GENERIC` socket.
pub struct NetlinkTransport {
    fd: OwnedFd,
    port_id: u32,
    buf: Vec<u8>,
}

impl NetlinkTransport {
    /// Open, enable extended ACK with capped echo, and bind.
    #[instrument(level = "debug")]
    pub fn open() -> Result<Self, TransportError> {
        // SAFETY: plain syscall, return value checked below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                NETLINK_GENERIC,
            )
        };
        if raw < 0 {
            return Err(TransportError::syscall("socket"));
        }
        // SAFETY: raw is a freshly created descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // Extended ACK is best effort: old kernels reject the option and
        // simply report bare errno values.
        if let Err(e) = set_int_opt(fd.as_raw_fd(), NETLINK_EXT_ACK, 1) {
            debug!(error = %e, "NETLINK_EXT_ACK unavailable");
        }
        if let Err(e) = set_int_opt(fd.as_raw_fd(), NETLINK_CAP_ACK, 1) {
            debug!(error = %e, "NETLINK_CAP_ACK unavailable");
        }

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: addr is a valid sockaddr_nl for the given length.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_nl).cast(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::syscall("bind"));
        }

        let mut bound: libc::sockaddr_nl = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        // SAFETY: bound/len describe a writable sockaddr_nl.
        let ret = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                (&mut bound as *mut libc::sockaddr_nl).cast(),
                &mut len,
            )
        };
        if ret < 0 {
            return Err(TransportError::syscall("getsockname"));
        }

        debug!(port_id = bound.nl_pid, "Netlink socket bound");
        Ok(Self {
            fd,
            port_id: bound.nl_pid,
            buf: vec![0u8; receive_buffer_size()],
        })
    }

    pub fn port_id(&self) -> u32 {
        self.port_id
    }
}

fn set_int_opt(fd: RawFd, opt: i32, value: libc::c_int) -> Result<(), TransportError> {
    // SAFETY: value outlives the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_NETLINK,
            opt,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(TransportError::syscall("setsockopt"));
    }
    Ok(())
}

impl Transport for NetlinkTransport {
    fn send(&mut self, key: &EventKey, datagram: &[u8]) -> Result<(), TransportError> {
        // SAFETY: sockaddr_nl is plain old data; nl_pid 0 addresses the kernel.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        // SAFETY: datagram and addr are valid for the lengths passed.
        let ret = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                datagram.as_ptr().cast(),
                datagram.len(),
                0,
                (&addr as *const libc::sockaddr_nl).cast(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::syscall("sendto"));
        }
        if ret as usize != datagram.len() {
            return Err(TransportError::ShortSend {
                sent: ret as usize,
                len: datagram.len(),
            });
        }
        trace!(key = %key, len = datagram.len(), "Sent request");
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        match recv_fd(self.fd.as_raw_fd(), &mut self.buf, 0)? {
            Some(0) | None => Ok(None),
            Some(n) => {
                trace!(len = n, "Received datagram");
                Ok(Some(&self.buf[..n]))
            }
        }
    }

    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        match recv_fd(self.fd.as_raw_fd(), &mut self.buf, libc::MSG_DONTWAIT)? {
            Some(n) => Ok(Some(&self.buf[..n])),
            None => Ok(None),
        }
    }

    fn join_multicast(&mut self, group: u32) -> Result<(), TransportError> {
        set_int_opt(self.fd.as_raw_fd(), NETLINK_ADD_MEMBERSHIP, group as libc::c_int)?;
        debug!(group, "Joined multicast group");
        Ok(())
    }

    fn poll_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Live
    }
}
