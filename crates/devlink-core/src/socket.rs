//! Generic netlink socket bound to the devlink family.
//!
//! A [`GenlSocket`] owns one transport and the family/multicast ids resolved
//! for it. Live sockets learn those ids from the generic netlink controller;
//! emulated sockets use a placeholder family id and a loopback pipe instead
//! of the kernel.

use std::fmt;
use std::os::fd::RawFd;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument};

use crate::error::DevlinkError;
use crate::protocol::{
    CTRL_CMD_GETFAMILY, CTRL_VERSION, CtrlAttr, DEVLINK_GENL_MCGRP_CONFIG_NAME, DEVLINK_GENL_NAME,
    DEVLINK_GENL_VERSION, DevlinkAttr, EMULATED_FAMILY_ID, GENL_ID_CTRL, Message,
};
use crate::record::{EventKey, EventStore};
use crate::rpc;
use crate::transport::replay::loopback_pair;
use crate::transport::{
    NetlinkTransport, RecordingTransport, ReplayTransport, Transport, TransportError,
    TransportKind,
};

/// How a socket reaches the kernel.
#[derive(Clone)]
pub enum SocketMode {
    /// Talk to the kernel.
    Live,
    /// Talk to the kernel and capture every response into the store.
    Record(Arc<dyn EventStore>),
    /// Replay responses from the store; the kernel is never contacted.
    Emulated(Arc<dyn EventStore>),
}

impl SocketMode {
    pub fn is_emulated(&self) -> bool {
        matches!(self, SocketMode::Emulated(_))
    }
}

impl fmt::Debug for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketMode::Live => write!(f, "Live"),
            SocketMode::Record(_) => write!(f, "Record"),
            SocketMode::Emulated(_) => write!(f, "Emulated"),
        }
    }
}

/// One generic netlink connection.
pub struct GenlSocket {
    transport: Box<dyn Transport>,
    family_id: u16,
    mcast_group_id: Option<u32>,
    seq: u32,
    loopback_peer: Option<UnixDatagram>,
}

impl GenlSocket {
    /// Open a socket for the devlink family in the given mode.
    #[instrument(level = "debug")]
    pub fn open(mode: &SocketMode) -> Result<Self, DevlinkError> {
        if let SocketMode::Emulated(store) = mode {
            let (local, peer) = loopback_pair()?;
            let transport = ReplayTransport::new(store.clone(), local);
            let mut socket = Self::from_transport(Box::new(transport), EMULATED_FAMILY_ID);
            socket.loopback_peer = Some(peer);
            debug!(family_id = EMULATED_FAMILY_ID, "Opened emulated devlink socket");
            return Ok(socket);
        }

        // The controller lookup is never recorded: emulated sockets do not
        // perform it.
        let mut ctrl = Self::from_transport(Box::new(NetlinkTransport::open()?), GENL_ID_CTRL);
        let (family_id, mcast_group_id) =
            ctrl.resolve_family(DEVLINK_GENL_NAME, DEVLINK_GENL_MCGRP_CONFIG_NAME)?;

        let transport = match mode {
            SocketMode::Record(store) => {
                Box::new(RecordingTransport::new(ctrl.transport, store.clone())) as Box<dyn Transport>
            }
            _ => ctrl.transport,
        };
        let mut socket = Self::from_transport(transport, family_id);
        socket.mcast_group_id = mcast_group_id;
        debug!(family_id, mcast_group_id, "Opened devlink socket");
        Ok(socket)
    }

    /// Wrap an already connected transport.
    pub fn from_transport(transport: Box<dyn Transport>, family_id: u16) -> Self {
        let seq = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(1);
        Self {
            transport,
            family_id,
            mcast_group_id: None,
            seq,
            loopback_peer: None,
        }
    }

    /// Look up `family` with `CTRL_CMD_GETFAMILY`, returning its id and the
    /// id of `group` if the family advertises it.
    pub fn resolve_family(
        &mut self,
        family: &str,
        group: &str,
    ) -> Result<(u16, Option<u32>), DevlinkError> {
        let request = Message::<CtrlAttr>::request(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, CTRL_VERSION, false)
            .with_attr(CtrlAttr::FamilyName(family.to_string()));

        let mut family_id = None;
        let mut group_id = None;
        rpc::send_recv(self, request, |msg| {
            for attr in &msg.attrs {
                match attr {
                    CtrlAttr::FamilyId(id) => family_id = Some(*id),
                    CtrlAttr::McastGroups(groups) => {
                        if let Some(g) = groups.iter().find(|g| g.name == group) {
                            group_id = Some(g.id);
                        }
                    }
                    CtrlAttr::FamilyName(_) => {}
                }
            }
            Ok(())
        })?;

        let family_id =
            family_id.ok_or_else(|| TransportError::FamilyNotFound(family.to_string()))?;
        Ok((family_id, group_id))
    }

    pub fn family_id(&self) -> u16 {
        self.family_id
    }

    pub fn mcast_group_id(&self) -> Option<u32> {
        self.mcast_group_id
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn is_emulated(&self) -> bool {
        self.kind() == TransportKind::Replay
    }

    /// Whether responses must carry the request's sequence number.
    /// Replayed and mocked transcripts are taken as-is.
    pub fn checks_sequence(&self) -> bool {
        matches!(self.kind(), TransportKind::Live | TransportKind::Recording)
    }

    pub fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// New devlink request addressed to this socket's family.
    pub fn devlink_request(&self, cmd: u8, dump: bool) -> Message<DevlinkAttr> {
        Message::request(self.family_id, cmd, DEVLINK_GENL_VERSION, dump)
    }

    /// Join the devlink `config` multicast group. No-op when emulated.
    pub fn subscribe_multicast(&mut self) -> Result<(), DevlinkError> {
        if self.is_emulated() {
            return Ok(());
        }
        let group = self.mcast_group_id.ok_or_else(|| {
            TransportError::McastGroupNotFound(DEVLINK_GENL_MCGRP_CONFIG_NAME.to_string())
        })?;
        self.transport.join_multicast(group)?;
        Ok(())
    }

    /// Writable end of the emulated loopback pipe, for injecting multicast
    /// datagrams.
    pub fn loopback_peer(&self) -> Option<&UnixDatagram> {
        self.loopback_peer.as_ref()
    }

    pub fn poll_fd(&self) -> RawFd {
        self.transport.poll_fd()
    }

    pub fn send(&mut self, key: &EventKey, datagram: &[u8]) -> Result<(), TransportError> {
        self.transport.send(key, datagram)
    }

    /// Next response datagram, borrowed from the socket's receive buffer.
    pub fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.transport.recv()
    }

    pub fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.transport.try_recv_multicast()
    }
}

impl fmt::Debug for GenlSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenlSocket")
            .field("kind", &self.kind())
            .field("family_id", &self.family_id)
            .field("mcast_group_id", &self.mcast_group_id)
            .finish()
    }
}
