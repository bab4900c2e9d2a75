//! Record and replay transports.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;

use tracing::{debug, trace};

use super::netlink::receive_buffer_size;
use super::traits::{Transport, TransportError, TransportKind};
use crate::record::{EventKey, EventStore};

/// Non-blocking loopback datagram pipe standing in for the kernel socket.
///
/// The read end is owned by the transport; the peer can be handed out so
/// unsolicited datagrams can be injected.
pub(crate) fn loopback_pair() -> Result<(UnixDatagram, UnixDatagram), TransportError> {
    let (local, peer) = UnixDatagram::pair()?;
    local.set_nonblocking(true)?;
    Ok((local, peer))
}

/// Wraps another transport and captures every response datagram.
pub struct RecordingTransport<T: Transport> {
    inner: T,
    store: Arc<dyn EventStore>,
    key: Option<EventKey>,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T, store: Arc<dyn EventStore>) -> Self {
        Self {
            inner,
            store,
            key: None,
        }
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    fn send(&mut self, key: &EventKey, datagram: &[u8]) -> Result<(), TransportError> {
        self.inner.send(key, datagram)?;
        self.store.begin(key);
        self.key = Some(key.clone());
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        let datagram = self.inner.recv()?;
        if let (Some(data), Some(key)) = (datagram, self.key.as_ref()) {
            trace!(key = %key, len = data.len(), "Recorded datagram");
            self.store.append(key, data);
        }
        Ok(datagram)
    }

    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.inner.try_recv_multicast()
    }

    fn join_multicast(&mut self, group: u32) -> Result<(), TransportError> {
        self.inner.join_multicast(group)
    }

    fn poll_fd(&self) -> RawFd {
        self.inner.poll_fd()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Recording
    }
}

/// Feeds captured datagrams back instead of talking to the kernel.
pub struct ReplayTransport {
    store: Arc<dyn EventStore>,
    pending: VecDeque<Vec<u8>>,
    loopback: UnixDatagram,
    buf: Vec<u8>,
}

impl ReplayTransport {
    pub fn new(store: Arc<dyn EventStore>, loopback: UnixDatagram) -> Self {
        Self {
            store,
            pending: VecDeque::new(),
            loopback,
            buf: vec![0u8; receive_buffer_size()],
        }
    }
}

impl Transport for ReplayTransport {
    fn send(&mut self, key: &EventKey, _datagram: &[u8]) -> Result<(), TransportError> {
        let event = self
            .store
            .load(key)
            .ok_or_else(|| TransportError::EventNotFound(key.clone()))?;
        debug!(key = %key, datagrams = event.payloads.len(), "Replaying event");
        self.pending = event.payloads.into();
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        let Some(payload) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.buf.clear();
        self.buf.extend_from_slice(&payload);
        Ok(Some(&self.buf[..]))
    }

    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.buf.resize(receive_buffer_size(), 0);
        match self.loopback.recv(&mut self.buf) {
            Ok(n) => Ok(Some(&self.buf[..n])),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Syscall {
                op: "recv",
                source: e,
            }),
        }
    }

    fn join_multicast(&mut self, _group: u32) -> Result<(), TransportError> {
        Ok(())
    }

    fn poll_fd(&self) -> RawFd {
        self.loopback.as_raw_fd()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryEventStore;
    use crate::transport::MockTransport;

    #[test]
    fn test_replay_exhausts_to_none() {
        let store = Arc::new(MemoryEventStore::new());
        let key = EventKey::new("DevlinkCmd=INFO_GET");
        store.append(&key, b"first");
        store.append(&key, b"second");

        let (local, _peer) = loopback_pair().unwrap();
        let mut t = ReplayTransport::new(store, local);
        t.send(&key, b"ignored").unwrap();
        assert_eq!(t.recv().unwrap(), Some(&b"first"[..]));
        assert_eq!(t.recv().unwrap(), Some(&b"second"[..]));
        assert_eq!(t.recv().unwrap(), None);
    }

    #[test]
    fn test_replay_missing_event() {
        let (local, _peer) = loopback_pair().unwrap();
        let mut t = ReplayTransport::new(Arc::new(MemoryEventStore::new()), local);
        let err = t.send(&EventKey::new("nope"), &[]).unwrap_err();
        assert!(matches!(err, TransportError::EventNotFound(_)));
    }

    #[test]
    fn test_loopback_multicast() {
        let (local, peer) = loopback_pair().unwrap();
        let mut t = ReplayTransport::new(Arc::new(MemoryEventStore::new()), local);
        assert_eq!(t.try_recv_multicast().unwrap(), None);
        peer.send(b"status").unwrap();
        assert_eq!(t.try_recv_multicast().unwrap(), Some(&b"status"[..]));
    }

    #[test]
    fn test_recording_captures_responses() {
        let store = Arc::new(MemoryEventStore::new());
        let mock = MockTransport::new();
        mock.queue_response(vec![b"reply-1".to_vec(), b"reply-2".to_vec()]);

        let mut t = RecordingTransport::new(mock, store.clone());
        let key = EventKey::new("DevlinkCmd=GET");
        t.send(&key, b"request").unwrap();
        while t.recv().unwrap().is_some() {}

        let event = store.load(&key).unwrap();
        assert_eq!(event.payloads, vec![b"reply-1".to_vec(), b"reply-2".to_vec()]);
        assert_eq!(t.kind(), TransportKind::Recording);
    }

    #[test]
    fn test_repeated_request_replays_in_order() {
        let store = Arc::new(MemoryEventStore::new());
        let mock = MockTransport::new();
        mock.queue_response(vec![b"running=1.0".to_vec()]);
        mock.queue_response(vec![b"running=2.0".to_vec()]);

        let key = EventKey::new("DevlinkCmd=INFO_GET,BusName=netdevsim,DevName=netdevsim7");
        let mut recorder = RecordingTransport::new(mock, store.clone());
        for _ in 0..2 {
            recorder.send(&key, b"request").unwrap();
            while recorder.recv().unwrap().is_some() {}
        }
        assert_eq!(store.len(), 2);

        let (local, _peer) = loopback_pair().unwrap();
        let mut t = ReplayTransport::new(store, local);
        t.send(&key, b"request").unwrap();
        assert_eq!(t.recv().unwrap(), Some(&b"running=1.0"[..]));
        assert_eq!(t.recv().unwrap(), None);
        t.send(&key, b"request").unwrap();
        assert_eq!(t.recv().unwrap(), Some(&b"running=2.0"[..]));
        assert_eq!(t.recv().unwrap(), None);
    }
}
