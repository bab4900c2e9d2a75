//! Flash-update orchestration.
//!
//! The kernel executes `DEVLINK_CMD_FLASH_UPDATE` synchronously: the request
//! is only acknowledged once the driver is done, which can take minutes.
//! Progress arrives meanwhile as `FLASH_UPDATE_STATUS` / `FLASH_UPDATE_END`
//! multicast notifications. A scoped worker thread therefore blocks on the
//! command socket while the calling thread runs a single-threaded tokio loop
//! on a second, monitor socket. The two sockets never share a buffer.

use std::os::fd::{AsRawFd, RawFd};
use std::thread;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::DevlinkError;
use crate::events::{DeviceHandle, ProgressSink, ProgressTracker};
use crate::protocol::{
    DEVLINK_CMD_FLASH_UPDATE, DEVLINK_CMD_FLASH_UPDATE_END, DEVLINK_CMD_FLASH_UPDATE_STATUS,
    DevlinkAttr, Message, NlFrames,
};
use crate::rpc;
use crate::socket::{GenlSocket, SocketMode};

const WORKER_NAME: &str = "devlink-flash-send";

/// One flash-update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    pub handle: DeviceHandle,
    /// Component to flash; `None` lets the driver pick its default.
    pub component: Option<String>,
    /// File name relative to the kernel firmware search path.
    pub file_name: String,
}

impl FlashRequest {
    pub fn new(handle: DeviceHandle, component: Option<String>, file_name: impl Into<String>) -> Self {
        Self {
            handle,
            component,
            file_name: file_name.into(),
        }
    }

    pub fn to_message(&self, socket: &GenlSocket) -> Message<DevlinkAttr> {
        let mut msg = socket
            .devlink_request(DEVLINK_CMD_FLASH_UPDATE, false)
            .with_attr(DevlinkAttr::BusName(self.handle.bus_name.clone()))
            .with_attr(DevlinkAttr::DevName(self.handle.dev_name.clone()));
        if let Some(component) = &self.component {
            msg.push(DevlinkAttr::FlashComponent(component.clone()));
        }
        msg.push(DevlinkAttr::FlashFileName(self.file_name.clone()));
        msg
    }
}

/// Runs flash commands for devices opened in one socket mode.
#[derive(Debug, Clone)]
pub struct FlashOrchestrator {
    mode: SocketMode,
}

impl FlashOrchestrator {
    pub fn new(mode: SocketMode) -> Self {
        Self { mode }
    }

    /// Open a second socket subscribed to the `config` multicast group.
    pub fn open_monitor(&self) -> Result<GenlSocket, DevlinkError> {
        let mut monitor = GenlSocket::open(&self.mode)?;
        monitor.subscribe_multicast()?;
        Ok(monitor)
    }

    /// Flash using `command`, watching progress on a freshly opened monitor
    /// socket.
    pub fn run(
        &self,
        command: &mut GenlSocket,
        request: &FlashRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), DevlinkError> {
        let mut monitor = self.open_monitor()?;
        run_with_monitor(command, &mut monitor, request, progress)
    }
}

/// Flash using `command` while draining progress notifications from
/// `monitor`. Returns the command's result once both sides are finished.
#[instrument(skip_all, fields(device = %request.handle, component = ?request.component))]
pub fn run_with_monitor(
    command: &mut GenlSocket,
    monitor: &mut GenlSocket,
    request: &FlashRequest,
    progress: &mut dyn ProgressSink,
) -> Result<(), DevlinkError> {
    let mut tracker = ProgressTracker::new(progress);
    tracker.set_percentage(0);

    let message = request.to_message(command);
    let (tx, rx) = oneshot::channel();

    let result = thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn_scoped(scope, move || {
                debug!("Flash send thread started");
                // The receiver only goes away if the caller already gave up.
                let _ = tx.send(rpc::send(command, message));
            })
            .map_err(|e| DevlinkError::Internal(format!("failed to create flash send thread: {e}")))?;

        let result = monitor_until_complete(monitor, &request.handle, &mut tracker, rx);

        if worker.join().is_err() {
            return Err(DevlinkError::Internal("flash send thread panicked".into()));
        }
        result
    });

    if result.is_ok() {
        tracker.finish();
        info!(device = %request.handle, "Flash update finished");
    }
    result
}

/// Borrowed descriptor handed to `AsyncFd`; the socket keeps ownership.
struct PollFd(RawFd);

impl AsRawFd for PollFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

type WorkerResult = oneshot::Receiver<Result<(), DevlinkError>>;

fn worker_result(
    received: Result<Result<(), DevlinkError>, oneshot::error::RecvError>,
) -> Result<(), DevlinkError> {
    received.unwrap_or_else(|_| {
        Err(DevlinkError::Internal(
            "flash send thread exited without a result".into(),
        ))
    })
}

fn monitor_until_complete(
    monitor: &mut GenlSocket,
    handle: &DeviceHandle,
    tracker: &mut ProgressTracker<'_>,
    rx: WorkerResult,
) -> Result<(), DevlinkError> {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Cannot start progress loop, waiting for flash only");
            return worker_result(rx.blocking_recv());
        }
    };

    runtime.block_on(async move {
        let mut rx = rx;
        let fd = match AsyncFd::with_interest(PollFd(monitor.poll_fd()), Interest::READABLE) {
            Ok(fd) => Some(fd),
            Err(e) => {
                warn!(error = %e, "Cannot watch monitor socket, progress unavailable");
                None
            }
        };

        if let Some(fd) = fd {
            loop {
                tokio::select! {
                    biased;
                    ready = fd.readable() => {
                        let mut guard = match ready {
                            Ok(guard) => guard,
                            Err(e) => {
                                warn!(error = %e, "Monitor socket failed");
                                break;
                            }
                        };
                        let ended = drain_notifications(monitor, handle, tracker);
                        guard.clear_ready();
                        if ended {
                            debug!("Flash end notification received");
                            break;
                        }
                    }
                    result = &mut rx => return worker_result(result),
                }
            }
        }
        worker_result(rx.await)
    })
}

/// Read every queued notification. Returns true once `FLASH_UPDATE_END`
/// for `handle` was seen.
fn drain_notifications(
    monitor: &mut GenlSocket,
    handle: &DeviceHandle,
    tracker: &mut ProgressTracker<'_>,
) -> bool {
    loop {
        let datagram = match monitor.try_recv_multicast() {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to read flash notification");
                return false;
            }
        };
        if handle_notification(datagram, handle, tracker) {
            return true;
        }
    }
}

fn handle_notification(
    datagram: &[u8],
    handle: &DeviceHandle,
    tracker: &mut ProgressTracker<'_>,
) -> bool {
    for frame in NlFrames::new(datagram) {
        let msg = match frame.and_then(|f| Message::<DevlinkAttr>::from_frame(&f)) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Failed to process netlink message");
                return false;
            }
        };
        let cmd = msg.cmd();
        if cmd != DEVLINK_CMD_FLASH_UPDATE_STATUS && cmd != DEVLINK_CMD_FLASH_UPDATE_END {
            continue;
        }
        if !msg.is_for(&handle.bus_name, &handle.dev_name) {
            trace!(bus = ?msg.bus_name(), dev = ?msg.dev_name(), "Ignoring notification for other device");
            continue;
        }
        if cmd == DEVLINK_CMD_FLASH_UPDATE_END {
            tracker.set_percentage(100);
            return true;
        }

        let mut done = 0;
        let mut total = 0;
        for attr in &msg.attrs {
            match attr {
                DevlinkAttr::FlashStatusDone(v) => done = *v,
                DevlinkAttr::FlashStatusTotal(v) => total = *v,
                DevlinkAttr::FlashStatusMsg(text) => tracker.set_status(text),
                _ => {}
            }
        }
        trace!(done, total, "Flash status");
        tracker.set_fraction(done, total);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use crate::record::{EventKeyed, EventStore};
    use crate::transport::MockTransport;
    use std::time::Duration;

    #[derive(Default)]
    struct Log(Vec<u8>, Vec<String>);

    impl ProgressSink for Log {
        fn set_percentage(&mut self, percentage: u8) {
            self.0.push(percentage);
        }
        fn set_status(&mut self, message: &str) {
            self.1.push(message.to_string());
        }
    }

    fn handle() -> DeviceHandle {
        DeviceHandle::new("netdevsim", "netdevsim7")
    }

    fn notification(cmd: u8, dev: &str, attrs: Vec<DevlinkAttr>) -> Vec<u8> {
        let mut msg: Message<DevlinkAttr> =
            Message::request(0x14, cmd, DEVLINK_GENL_VERSION, false)
                .with_attr(DevlinkAttr::BusName("netdevsim".into()))
                .with_attr(DevlinkAttr::DevName(dev.into()));
        for attr in attrs {
            msg.push(attr);
        }
        msg.to_bytes().unwrap()
    }

    fn status(done: u64, total: u64) -> Vec<u8> {
        notification(
            DEVLINK_CMD_FLASH_UPDATE_STATUS,
            "netdevsim7",
            vec![
                DevlinkAttr::FlashStatusMsg("Flashing".into()),
                DevlinkAttr::FlashStatusDone(done),
                DevlinkAttr::FlashStatusTotal(total),
            ],
        )
    }

    /// Fake kernel that acknowledges the flash command after a delay.
    fn slow_command(errno: i32) -> GenlSocket {
        let mock = MockTransport::new().with_responder(move |req| {
            std::thread::sleep(Duration::from_millis(200));
            let hdr = NlMsgHdr::from_bytes(req).unwrap();
            vec![AckPayload {
                error: -errno,
                ext_msg: None,
            }
            .encode(&hdr)
            .unwrap()]
        });
        GenlSocket::from_transport(Box::new(mock), 0x14)
    }

    fn emulated_monitor() -> GenlSocket {
        let store = std::sync::Arc::new(crate::record::MemoryEventStore::new());
        GenlSocket::open(&SocketMode::Emulated(store)).unwrap()
    }

    #[test]
    fn test_request_message() {
        let socket = GenlSocket::from_transport(Box::new(MockTransport::new()), 0x14);
        let req = FlashRequest::new(handle(), Some("fw.mgmt".into()), "fw.bin");
        let msg = req.to_message(&socket);
        assert_eq!(msg.cmd(), DEVLINK_CMD_FLASH_UPDATE);
        assert_eq!(
            msg.attrs[2..],
            [
                DevlinkAttr::FlashComponent("fw.mgmt".into()),
                DevlinkAttr::FlashFileName("fw.bin".into())
            ]
        );

        let req = FlashRequest::new(handle(), None, "fw.bin");
        assert_eq!(req.to_message(&socket).attrs.len(), 3);
    }

    #[test]
    fn test_progress_from_notifications() {
        let mut command = slow_command(0);
        let mut monitor = emulated_monitor();
        let peer = monitor.loopback_peer().unwrap();
        peer.send(&status(25, 100)).unwrap();
        // Other devices are ignored.
        peer.send(&notification(DEVLINK_CMD_FLASH_UPDATE_END, "netdevsim9", vec![]))
            .unwrap();
        peer.send(&status(10, 100)).unwrap();
        peer.send(&status(50, 0)).unwrap();
        peer.send(&status(75, 100)).unwrap();

        let mut log = Log::default();
        let req = FlashRequest::new(handle(), None, "fw.bin");
        run_with_monitor(&mut command, &mut monitor, &req, &mut log).unwrap();

        assert_eq!(log.0, vec![0, 25, 75, 100]);
        assert!(log.1.iter().all(|s| s == "Flashing"));
    }

    #[test]
    fn test_end_notification_sets_complete() {
        let mut command = slow_command(0);
        let mut monitor = emulated_monitor();
        let peer = monitor.loopback_peer().unwrap();
        peer.send(&status(30, 100)).unwrap();
        peer.send(&notification(DEVLINK_CMD_FLASH_UPDATE_END, "netdevsim7", vec![]))
            .unwrap();

        let mut log = Log::default();
        let req = FlashRequest::new(handle(), Some("fw".into()), "fw.bin");
        run_with_monitor(&mut command, &mut monitor, &req, &mut log).unwrap();
        assert_eq!(log.0, vec![0, 30, 100]);
    }

    #[test]
    fn test_failure_keeps_worker_error() {
        let mut command = slow_command(libc::EIO);
        let mut monitor = emulated_monitor();
        let mut log = Log::default();
        let req = FlashRequest::new(handle(), None, "fw.bin");

        let err = run_with_monitor(&mut command, &mut monitor, &req, &mut log).unwrap_err();
        assert_eq!(err.report().unwrap().errno, libc::EIO);
        assert_eq!(log.0, vec![0]);
    }

    #[test]
    fn test_orchestrator_emulated() {
        let store = std::sync::Arc::new(crate::record::MemoryEventStore::new());
        let mode = SocketMode::Emulated(store.clone());
        let mut command = GenlSocket::open(&mode).unwrap();
        let req = FlashRequest::new(handle(), None, "fw.bin");

        // Recorded exchange: a single ACK.
        let key = req.to_message(&command).event_key();
        store.append(
            &key,
            &AckPayload {
                error: 0,
                ext_msg: None,
            }
            .encode(&NlMsgHdr::new(EMULATED_FAMILY_ID, NLM_F_REQUEST, 0))
            .unwrap(),
        );

        let mut log = Log::default();
        FlashOrchestrator::new(mode)
            .run(&mut command, &req, &mut log)
            .unwrap();
        assert_eq!(log.0, vec![0, 100]);
    }
}
