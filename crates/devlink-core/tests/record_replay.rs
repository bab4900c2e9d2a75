//! Record a device against a fake kernel, then replay the snapshot.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use devlink_core::protocol::*;
use devlink_core::transport::RecordingTransport;
use devlink_core::{
    DeviceLifecycle, DeviceMode, DevlinkConfig, DevlinkDevice, GenlSocket, MockTransport,
    ProgressSink,
};

const BUS: &str = "pci";
const DEV: &str = "0000:01:00.0";

fn version(kind: VersionKind, name: &str, value: &str) -> DevlinkAttr {
    DevlinkAttr::Version {
        kind,
        name: name.into(),
        value: value.into(),
    }
}

/// Answers `INFO_GET` like an mlx5 NIC, echoing the request sequence.
fn fake_kernel() -> MockTransport {
    MockTransport::new().with_responder(|req| {
        let hdr = NlMsgHdr::from_bytes(req).unwrap();
        let request = Message::<DevlinkAttr>::decode(req).unwrap();
        let mut out = Vec::new();
        if request.cmd() == DEVLINK_CMD_INFO_GET {
            let mut reply = Message::request(hdr.kind, DEVLINK_CMD_INFO_GET, DEVLINK_GENL_VERSION, false)
                .with_attr(DevlinkAttr::BusName(BUS.into()))
                .with_attr(DevlinkAttr::DevName(DEV.into()))
                .with_attr(DevlinkAttr::DriverName("mlx5_core".into()))
                .with_attr(DevlinkAttr::SerialNumber("MT2101X".into()))
                .with_attr(version(VersionKind::Fixed, "fw.psid", "MT_0000000359"))
                .with_attr(version(VersionKind::Running, "fw", "22.31.1014"))
                .with_attr(version(VersionKind::Stored, "fw", "22.31.1014"))
                .with_attr(version(VersionKind::Running, "fw.undi", "14.30.13"));
            reply.header.seq = hdr.seq;
            out.push(reply.to_bytes().unwrap());
        }
        out.push(AckPayload { error: 0, ext_msg: None }.encode(&hdr).unwrap());
        out
    })
}

fn recorded_device() -> DevlinkDevice {
    let mut device = DevlinkDevice::new(BUS, DEV).with_mode(DeviceMode::Record);
    let transport = RecordingTransport::new(fake_kernel(), device.events().clone());
    device.attach_socket(GenlSocket::from_transport(Box::new(transport), 0x14));
    device.setup().unwrap();
    device
}

#[test]
fn replay_reproduces_recorded_state() {
    let recorded = recorded_device();
    assert_eq!(recorded.components().len(), 2);
    assert!(!recorded.events().is_empty());

    let json = recorded.to_json().unwrap();
    let mut replayed = DevlinkDevice::from_json(&json).unwrap();
    assert_eq!(replayed.mode(), DeviceMode::Emulated);
    replayed.open().unwrap();
    replayed.setup().unwrap();

    assert_eq!(replayed.components(), recorded.components());
    assert_eq!(replayed.serial(), recorded.serial());
    assert_eq!(replayed.identity(), recorded.identity());
    assert_eq!(replayed.summary(), recorded.summary());
}

#[derive(Default)]
struct Log(Arc<Mutex<Vec<u8>>>);

impl ProgressSink for Log {
    fn set_percentage(&mut self, percentage: u8) {
        self.0.lock().unwrap().push(percentage);
    }
}

const OLD_FW: &str = "22.31.1014";
const NEW_FW: &str = "22.32.1000";

fn info_reply(seq: u32, running: &str, stored: &str) -> Vec<u8> {
    let mut reply = Message::request(0x14, DEVLINK_CMD_INFO_GET, DEVLINK_GENL_VERSION, false)
        .with_attr(DevlinkAttr::BusName(BUS.into()))
        .with_attr(DevlinkAttr::DevName(DEV.into()))
        .with_attr(DevlinkAttr::DriverName("mlx5_core".into()))
        .with_attr(version(VersionKind::Fixed, "fw.psid", "MT_0000000359"))
        .with_attr(version(VersionKind::Running, "fw", running))
        .with_attr(version(VersionKind::Stored, "fw", stored));
    reply.header.seq = seq;
    reply.to_bytes().unwrap()
}

/// A NIC whose `fw` version moves through a flash: the new image is stored
/// after `FLASH_UPDATE` and only runs once `RELOAD` activated it.
fn flashing_kernel() -> MockTransport {
    let mut info_calls = 0;
    MockTransport::new().with_responder(move |req| {
        let hdr = NlMsgHdr::from_bytes(req).unwrap();
        let request = Message::<DevlinkAttr>::decode(req).unwrap();
        let mut out = Vec::new();
        match request.cmd() {
            DEVLINK_CMD_INFO_GET => {
                let (running, stored) = match info_calls {
                    0 => (OLD_FW, OLD_FW),
                    1 => (OLD_FW, NEW_FW),
                    _ => (NEW_FW, NEW_FW),
                };
                info_calls += 1;
                out.push(info_reply(hdr.seq, running, stored));
            }
            DEVLINK_CMD_FLASH_UPDATE => thread::sleep(Duration::from_millis(100)),
            _ => {}
        }
        out.push(AckPayload { error: 0, ext_msg: None }.encode(&hdr).unwrap());
        out
    })
}

fn flash_status(done: u64, total: u64) -> Vec<u8> {
    Message::request(0x14, DEVLINK_CMD_FLASH_UPDATE_STATUS, DEVLINK_GENL_VERSION, false)
        .with_attr(DevlinkAttr::BusName(BUS.into()))
        .with_attr(DevlinkAttr::DevName(DEV.into()))
        .with_attr(DevlinkAttr::FlashStatusMsg("Flashing".into()))
        .with_attr(DevlinkAttr::FlashStatusDone(done))
        .with_attr(DevlinkAttr::FlashStatusTotal(total))
        .to_bytes()
        .unwrap()
}

fn search_path_config(tmp: &Path) -> DevlinkConfig {
    let param = tmp.join("firmware_class_path");
    fs::write(&param, "\n").unwrap();
    DevlinkConfig {
        firmware_class_path: param,
        cache_dir: tmp.join("cache"),
        ..Default::default()
    }
}

#[test]
fn recorded_flash_and_activation_replay() {
    let tmp = tempfile::tempdir().unwrap();
    let config = search_path_config(tmp.path());

    let mut recorded = DevlinkDevice::new(BUS, DEV).with_mode(DeviceMode::Record);
    recorded.apply_config(&config);
    let command = flashing_kernel();
    let sent = command.write_log();
    recorded.attach_socket(GenlSocket::from_transport(
        Box::new(RecordingTransport::new(command, recorded.events().clone())),
        0x14,
    ));
    let monitor = MockTransport::new();
    monitor.inject_multicast(&flash_status(50, 100));
    recorded.attach_monitor(GenlSocket::from_transport(
        Box::new(RecordingTransport::new(monitor, recorded.events().clone())),
        0x14,
    ));

    recorded.setup().unwrap();
    let before_flash = recorded.components().to_vec();
    assert_eq!(recorded.component("fw").unwrap().version, OLD_FW);

    recorded.prepare().unwrap();
    let mut sink = Log::default();
    let seen = sink.0.clone();
    recorded.write_firmware(b"\x7fFW image", Some("fw"), &mut sink).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 50, 100]);
    recorded.refresh().unwrap();
    recorded.cleanup().unwrap();
    let after_flash = recorded.components().to_vec();
    assert_eq!(recorded.component("fw").unwrap().version, NEW_FW);

    let commands: Vec<u8> = sent
        .lock()
        .unwrap()
        .iter()
        .map(|req| Message::<DevlinkAttr>::decode(req).unwrap().cmd())
        .collect();
    assert_eq!(
        commands,
        vec![
            DEVLINK_CMD_INFO_GET,
            DEVLINK_CMD_FLASH_UPDATE,
            DEVLINK_CMD_INFO_GET,
            DEVLINK_CMD_RELOAD,
            DEVLINK_CMD_INFO_GET,
        ]
    );
    let keys: Vec<String> = recorded
        .events()
        .keys()
        .iter()
        .map(|k| k.as_str().split(',').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        keys,
        vec![
            "DevlinkCmd=INFO_GET",
            "DevlinkCmd=FLASH_UPDATE",
            "DevlinkCmd=INFO_GET",
            "DevlinkCmd=RELOAD",
            "DevlinkCmd=INFO_GET",
        ]
    );
    assert_eq!(fs::read_to_string(&config.firmware_class_path).unwrap(), "\n");

    // Replay the snapshot through the same calls.
    let mut replayed = DevlinkDevice::from_json(&recorded.to_json().unwrap()).unwrap();
    replayed.apply_config(&config);
    replayed.open().unwrap();
    replayed.setup().unwrap();
    assert_eq!(replayed.components(), before_flash.as_slice());

    replayed.prepare().unwrap();
    let firmware_dir = config.firmware_dir();
    assert_eq!(
        fs::read_to_string(&config.firmware_class_path).unwrap(),
        firmware_dir.to_string_lossy()
    );
    let mut sink = Log::default();
    let seen = sink.0.clone();
    replayed.write_firmware(b"\x7fFW image", Some("fw"), &mut sink).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    assert_eq!(fs::read_dir(&firmware_dir).unwrap().count(), 0);

    replayed.refresh().unwrap();
    assert_eq!(replayed.components(), after_flash.as_slice());

    replayed.cleanup().unwrap();
    replayed.close().unwrap();
    assert_eq!(fs::read_to_string(&config.firmware_class_path).unwrap(), "\n");
}

#[test]
fn replay_without_recording_fails() {
    let mut device = DevlinkDevice::new("netdevsim", "netdevsim1").with_mode(DeviceMode::Emulated);
    device.open().unwrap();
    assert!(device.setup().is_err());
}
