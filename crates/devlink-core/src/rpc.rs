//! Request/response engine.
//!
//! [`send_recv`] serializes a request, hands it to the socket's transport and
//! dispatches every response message to a handler until the kernel signals
//! the end of the exchange:
//!
//! - `NLMSG_ERROR` with a non-zero errno fails with an [`ErrorReport`]
//! - `NLMSG_ERROR` with errno 0 (plain ACK) or `NLMSG_DONE` completes
//! - a zero-length read or an exhausted replay completes
//! - anything else is decoded and passed to the handler
//!
//! Recording and replay happen below this layer, in the transport, so the
//! loop is identical in every socket mode.

use std::fmt;
use std::io;

use tracing::{instrument, trace, warn};

use crate::error::{DevlinkError, ErrorKind};
use crate::protocol::{AckPayload, Attribute, Message, NLMSG_MIN_TYPE, NlFrames};
use crate::record::EventKeyed;
use crate::socket::GenlSocket;

/// A kernel-reported failure for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Positive errno value.
    pub errno: i32,
    /// Extended ACK text, if the kernel supplied one.
    pub message: Option<String>,
}

impl ErrorReport {
    /// Map the errno onto a generic failure class.
    pub fn kind(&self) -> ErrorKind {
        match self.errno {
            libc::EOPNOTSUPP | libc::ENOSYS => ErrorKind::NotSupported,
            libc::EINVAL | libc::ERANGE => ErrorKind::InvalidData,
            libc::ENOENT | libc::ENODEV | libc::ENXIO => ErrorKind::NotFound,
            libc::EPERM | libc::EACCES => ErrorKind::PermissionDenied,
            libc::EBUSY | libc::EAGAIN | libc::EINPROGRESS => ErrorKind::Busy,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<AckPayload> for ErrorReport {
    fn from(ack: AckPayload) -> Self {
        Self {
            errno: -ack.error,
            message: ack.ext_msg,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = io::Error::from_raw_os_error(self.errno);
        match &self.message {
            Some(message) => write!(f, "{message} ({os})"),
            None => write!(f, "{os}"),
        }
    }
}

/// Progress of one request through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcState {
    Built,
    Sent,
    AwaitingDatagram,
    Dispatching,
    Done,
    Failed,
}

enum Flow {
    Continue,
    Done,
}

/// Send `request` and feed every response message to `handler`.
#[instrument(level = "debug", skip_all, fields(cmd = request.cmd(), key = tracing::field::Empty))]
pub fn send_recv<A, F>(
    socket: &mut GenlSocket,
    mut request: Message<A>,
    mut handler: F,
) -> Result<(), DevlinkError>
where
    A: Attribute,
    Message<A>: EventKeyed,
    F: FnMut(&Message<A>) -> Result<(), DevlinkError>,
{
    let key = request.event_key();
    tracing::Span::current().record("key", key.as_str());

    let seq = socket.next_seq();
    request.header.seq = seq;
    let check_seq = socket.checks_sequence();
    let datagram = match request.to_bytes() {
        Ok(datagram) => datagram,
        Err(e) => {
            trace!(state = ?RpcState::Failed);
            return Err(e.into());
        }
    };
    trace!(state = ?RpcState::Built, seq, len = datagram.len());

    if let Err(e) = socket.send(&key, &datagram) {
        trace!(state = ?RpcState::Failed);
        return Err(e.into());
    }
    trace!(state = ?RpcState::Sent);

    loop {
        trace!(state = ?RpcState::AwaitingDatagram);
        let received = match socket.recv() {
            Ok(received) => received,
            Err(e) => {
                trace!(state = ?RpcState::Failed);
                return Err(e.into());
            }
        };
        let Some(received) = received else {
            trace!(state = ?RpcState::Done, "No more data");
            return Ok(());
        };

        trace!(state = ?RpcState::Dispatching, len = received.len());
        match dispatch(received, seq, check_seq, &mut handler) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Done) => {
                trace!(state = ?RpcState::Done);
                return Ok(());
            }
            Err(e) => {
                trace!(state = ?RpcState::Failed);
                return Err(e);
            }
        }
    }
}

/// [`send_recv`] for requests whose replies carry nothing of interest.
pub fn send<A>(socket: &mut GenlSocket, request: Message<A>) -> Result<(), DevlinkError>
where
    A: Attribute,
    Message<A>: EventKeyed,
{
    send_recv(socket, request, |_| Ok(()))
}

fn dispatch<A, F>(
    datagram: &[u8],
    seq: u32,
    check_seq: bool,
    handler: &mut F,
) -> Result<Flow, DevlinkError>
where
    A: Attribute,
    F: FnMut(&Message<A>) -> Result<(), DevlinkError>,
{
    for frame in NlFrames::new(datagram) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Malformed response, ending exchange");
                return Ok(Flow::Done);
            }
        };

        if check_seq && frame.header.seq != seq {
            warn!(
                expected = seq,
                got = frame.header.seq,
                "Skipping message with unexpected sequence number"
            );
            continue;
        }

        if frame.is_error() {
            let ack = match frame.ack() {
                Ok(ack) => ack,
                Err(e) => {
                    warn!(error = %e, "Malformed error report, ending exchange");
                    return Ok(Flow::Done);
                }
            };
            if ack.error == 0 {
                return Ok(Flow::Done);
            }
            return Err(DevlinkError::Protocol(ack.into()));
        }
        if frame.is_done() {
            return Ok(Flow::Done);
        }
        if frame.header.kind < NLMSG_MIN_TYPE {
            continue;
        }

        match Message::<A>::from_frame(&frame) {
            Ok(msg) => handler(&msg)?,
            Err(e) => {
                warn!(error = %e, "Undecodable message, ending exchange");
                return Ok(Flow::Done);
            }
        }
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use crate::transport::MockTransport;

    fn socket_with(mock: MockTransport) -> GenlSocket {
        GenlSocket::from_transport(Box::new(mock), 0x14)
    }

    fn info_reply(seq: u32, dev: &str) -> Vec<u8> {
        let mut msg: Message<DevlinkAttr> =
            Message::request(0x14, DEVLINK_CMD_INFO_GET, DEVLINK_GENL_VERSION, false)
                .with_attr(DevlinkAttr::BusName("netdevsim".into()))
                .with_attr(DevlinkAttr::DevName(dev.into()))
                .with_attr(DevlinkAttr::DriverName("netdevsim".into()));
        msg.header.seq = seq;
        msg.to_bytes().unwrap()
    }

    fn request(socket: &GenlSocket) -> Message<DevlinkAttr> {
        socket
            .devlink_request(DEVLINK_CMD_INFO_GET, false)
            .with_attr(DevlinkAttr::BusName("netdevsim".into()))
            .with_attr(DevlinkAttr::DevName("netdevsim7".into()))
    }

    #[test]
    fn test_reply_then_ack() {
        let mock = MockTransport::new().with_responder(|req| {
            let hdr = NlMsgHdr::from_bytes(req).unwrap();
            let ack = AckPayload {
                error: 0,
                ext_msg: None,
            };
            vec![info_reply(hdr.seq, "netdevsim7"), ack.encode(&hdr).unwrap()]
        });
        let mut socket = socket_with(mock);
        let req = request(&socket);

        let mut seen = Vec::new();
        send_recv(&mut socket, req, |msg| {
            seen.push(msg.dev_name().map(str::to_owned));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Some("netdevsim7".to_string())]);
    }

    #[test]
    fn test_error_report_with_extack() {
        let mock = MockTransport::new().with_responder(|req| {
            let hdr = NlMsgHdr::from_bytes(req).unwrap();
            let ack = AckPayload {
                error: -libc::EOPNOTSUPP,
                ext_msg: Some("component not supported".into()),
            };
            vec![ack.encode(&hdr).unwrap()]
        });
        let mut socket = socket_with(mock);
        let req = request(&socket);

        let err = send(&mut socket, req).unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.errno, libc::EOPNOTSUPP);
        assert_eq!(report.message.as_deref(), Some("component not supported"));
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_unencodable_request_never_sent() {
        let mock = MockTransport::new();
        let writes = mock.write_log();
        let mut socket = socket_with(mock);
        let req = request(&socket).with_attr(DevlinkAttr::FlashFileName("x".repeat(70_000)));

        let err = send(&mut socket, req).unwrap_err();
        assert!(matches!(
            err,
            DevlinkError::Codec(CodecError::AttributeTooLarge { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dump_multiple_datagrams() {
        let mock = MockTransport::new().with_responder(|req| {
            let seq = NlMsgHdr::from_bytes(req).unwrap().seq;
            let mut first = info_reply(seq, "netdevsim1");
            first.extend(info_reply(seq, "netdevsim2"));
            vec![first, info_reply(seq, "netdevsim3"), done_frame(seq)]
        });
        let mut socket = socket_with(mock);
        let req = socket.devlink_request(DEVLINK_CMD_GET, true);

        let mut count = 0;
        send_recv(&mut socket, req, |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_silence_is_done() {
        let mut socket = socket_with(MockTransport::new());
        let req = request(&socket);
        let mut called = false;
        send_recv(&mut socket, req, |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!called);
    }

    #[test]
    fn test_malformed_datagram_ends_exchange() {
        let mock = MockTransport::new();
        // Declared length overruns the datagram.
        let mut bad = info_reply(1, "netdevsim7");
        bad[0] = 0xff;
        mock.queue_response(vec![bad, info_reply(1, "netdevsim8")]);
        let mut socket = socket_with(mock);
        let req = request(&socket);

        let mut called = false;
        send_recv(&mut socket, req, |_| {
            called = true;
            Ok(())
        })
        .unwrap();
        assert!(!called);
    }

    #[test]
    fn test_handler_error_propagates() {
        let mock = MockTransport::new();
        mock.queue_response(vec![info_reply(1, "netdevsim7")]);
        let mut socket = socket_with(mock);
        let req = request(&socket);

        let err = send_recv(&mut socket, req, |_| {
            Err(DevlinkError::InvalidData("bad reply".into()))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_errno_mapping() {
        let report = |errno| ErrorReport {
            errno,
            message: None,
        };
        assert_eq!(report(libc::ENODEV).kind(), ErrorKind::NotFound);
        assert_eq!(report(libc::EPERM).kind(), ErrorKind::PermissionDenied);
        assert_eq!(report(libc::EBUSY).kind(), ErrorKind::Busy);
        assert_eq!(report(libc::EIO).kind(), ErrorKind::Internal);
    }
}
