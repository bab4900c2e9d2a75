//! Mock netlink transport for testing.
//!
//! Acts as a fake kernel: each request pops the next queued batch of
//! response datagrams, or asks a responder closure for them.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::{Arc, Mutex};

use super::replay::loopback_pair;
use super::traits::{Transport, TransportError, TransportKind};
use crate::record::EventKey;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Mock transport for unit testing the request/response engine.
pub struct MockTransport {
    /// Queued response batches, one per upcoming request.
    responses: Arc<Mutex<VecDeque<Vec<Vec<u8>>>>>,
    /// Captured requests.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    responder: Option<Responder>,
    pending: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
    multicast: UnixDatagram,
    multicast_peer: UnixDatagram,
    /// Whether the fake kernel is reachable.
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (multicast, multicast_peer) =
            loopback_pair().expect("failed to create loopback pair for mock transport");
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            responder: None,
            pending: VecDeque::new(),
            buf: Vec::new(),
            multicast,
            multicast_peer,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Answer every request by calling `responder` with the request bytes.
    pub fn with_responder(
        mut self,
        responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Queue the datagrams returned for the next request.
    pub fn queue_response(&self, datagrams: Vec<Vec<u8>>) {
        self.responses.lock().unwrap().push_back(datagrams);
    }

    /// Get all captured requests.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Shared handle to the request log, usable after the mock is boxed.
    pub fn write_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        self.write_log.clone()
    }

    /// Inject an unsolicited multicast datagram.
    pub fn inject_multicast(&self, datagram: &[u8]) {
        self.multicast_peer.send(datagram).unwrap();
    }

    /// Simulate the kernel going away.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, _key: &EventKey, datagram: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(datagram.to_vec());
        let batch = match self.responder.as_mut() {
            Some(responder) => responder(datagram),
            None => self.responses.lock().unwrap().pop_front().unwrap_or_default(),
        };
        self.pending = batch.into();
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<&[u8]>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        match self.pending.pop_front() {
            Some(datagram) => {
                self.buf = datagram;
                Ok(Some(&self.buf[..]))
            }
            None => Ok(None),
        }
    }

    fn try_recv_multicast(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.buf.resize(super::netlink::receive_buffer_size(), 0);
        match self.multicast.recv(&mut self.buf) {
            Ok(n) => Ok(Some(&self.buf[..n])),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn join_multicast(&mut self, _group: u32) -> Result<(), TransportError> {
        Ok(())
    }

    fn poll_fd(&self) -> RawFd {
        self.multicast.as_raw_fd()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_queue() {
        let mut mock = MockTransport::new();
        mock.queue_response(vec![b"a".to_vec(), b"b".to_vec()]);
        let key = EventKey::new("k");

        mock.send(&key, b"req").unwrap();
        assert_eq!(mock.recv().unwrap(), Some(&b"a"[..]));
        assert_eq!(mock.recv().unwrap(), Some(&b"b"[..]));
        assert_eq!(mock.recv().unwrap(), None);

        // No queued batch: the fake kernel stays silent.
        mock.send(&key, b"again").unwrap();
        assert_eq!(mock.recv().unwrap(), None);
        assert_eq!(mock.get_writes(), vec![b"req".to_vec(), b"again".to_vec()]);
    }

    #[test]
    fn test_mock_responder() {
        let mut mock = MockTransport::new().with_responder(|req| vec![req.to_vec()]);
        mock.send(&EventKey::new("k"), b"echo").unwrap();
        assert_eq!(mock.recv().unwrap(), Some(&b"echo"[..]));
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        mock.disconnect();
        assert!(matches!(
            mock.send(&EventKey::new("k"), b"x"),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_mock_multicast() {
        let mut mock = MockTransport::new();
        assert_eq!(mock.try_recv_multicast().unwrap(), None);
        mock.inject_multicast(b"hello");
        assert_eq!(mock.try_recv_multicast().unwrap(), Some(&b"hello"[..]));
    }
}
