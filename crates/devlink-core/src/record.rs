//! Event capture for record/replay.
//!
//! Every request is identified by an [`EventKey`] built from its command and
//! identity attributes. In record mode the response datagrams for a key are
//! appended to a [`RecordedEvent`]; in emulated mode they are read back
//! verbatim. Persistence belongs to the caller: [`MemoryEventStore`] only
//! converts to and from the serializable [`EventEntry`] list.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::protocol::{CtrlAttr, DevlinkAttr, Message, devlink_cmd_name};

/// Canonical identifier of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requests that can be recorded and replayed.
pub trait EventKeyed {
    fn event_key(&self) -> EventKey;
}

impl EventKeyed for Message<DevlinkAttr> {
    /// `DevlinkCmd=<NAME>` plus the identity attributes in a fixed order.
    /// Other attributes never influence the key.
    fn event_key(&self) -> EventKey {
        let mut key = format!("DevlinkCmd={}", devlink_cmd_name(self.cmd()));
        let mut append = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                key.push_str(&format!(",{name}={value}"));
            }
        };
        append("BusName", self.bus_name().map(str::to_owned));
        append("DevName", self.dev_name().map(str::to_owned));
        append(
            "FileName",
            self.attrs.iter().find_map(|a| match a {
                DevlinkAttr::FlashFileName(s) => Some(s.clone()),
                _ => None,
            }),
        );
        append(
            "Component",
            self.attrs.iter().find_map(|a| match a {
                DevlinkAttr::FlashComponent(s) => Some(s.clone()),
                _ => None,
            }),
        );
        append(
            "ReloadAction",
            self.attrs.iter().find_map(|a| match a {
                DevlinkAttr::ReloadAction(v) => Some(v.to_string()),
                _ => None,
            }),
        );
        EventKey(key)
    }
}

impl EventKeyed for Message<CtrlAttr> {
    fn event_key(&self) -> EventKey {
        let family = self.attrs.iter().find_map(|a| match a {
            CtrlAttr::FamilyName(s) => Some(s.as_str()),
            _ => None,
        });
        EventKey(format!(
            "GenlCtrlCmd={},FamilyName={}",
            self.cmd(),
            family.unwrap_or_default()
        ))
    }
}

/// Captured response datagrams for one key, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub key: EventKey,
    pub payloads: Vec<Vec<u8>>,
}

/// Keyed transcript storage supplied by the owning device.
///
/// A key can be exchanged more than once during a session, e.g. an
/// `INFO_GET` before and after a flash. Each exchange is kept as its own
/// occurrence and replayed in capture order.
pub trait EventStore: Send + Sync {
    /// Start a new occurrence of `key`.
    fn begin(&self, key: &EventKey);

    /// Append one response datagram to the latest occurrence of `key`.
    fn append(&self, key: &EventKey, payload: &[u8]);

    /// Take the next unreplayed occurrence of `key`. Once all occurrences
    /// have been taken the last one is returned again.
    fn load(&self, key: &EventKey) -> Option<RecordedEvent>;
}

/// Serialized form of one event: hex-encoded datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    #[serde(rename = "Id")]
    pub id: EventKey,
    #[serde(rename = "Data", default)]
    pub data: Vec<String>,
}

#[derive(Debug, Default)]
struct Transcript {
    events: Vec<RecordedEvent>,
    /// Occurrences of each key already handed out by `load`.
    replayed: HashMap<EventKey, usize>,
}

/// In-memory [`EventStore`], ordered by capture.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    inner: Mutex<Transcript>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transcript(&self) -> MutexGuard<'_, Transcript> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.transcript().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript().events.is_empty()
    }

    /// Keys of all occurrences, repeated keys included.
    pub fn keys(&self) -> Vec<EventKey> {
        self.transcript().events.iter().map(|e| e.key.clone()).collect()
    }

    /// Forget which occurrences were already replayed.
    pub fn rewind(&self) {
        self.transcript().replayed.clear();
    }

    pub fn to_entries(&self) -> Vec<EventEntry> {
        self.transcript()
            .events
            .iter()
            .map(|e| EventEntry {
                id: e.key.clone(),
                data: e.payloads.iter().map(hex::encode).collect(),
            })
            .collect()
    }

    pub fn from_entries(entries: &[EventEntry]) -> Result<Self, hex::FromHexError> {
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let payloads = entry
                .data
                .iter()
                .map(hex::decode)
                .collect::<Result<Vec<_>, _>>()?;
            events.push(RecordedEvent {
                key: entry.id.clone(),
                payloads,
            });
        }
        Ok(Self {
            inner: Mutex::new(Transcript {
                events,
                replayed: HashMap::new(),
            }),
        })
    }
}

impl EventStore for MemoryEventStore {
    fn begin(&self, key: &EventKey) {
        self.transcript().events.push(RecordedEvent {
            key: key.clone(),
            payloads: Vec::new(),
        });
    }

    fn append(&self, key: &EventKey, payload: &[u8]) {
        let mut transcript = self.transcript();
        match transcript.events.iter_mut().rev().find(|e| &e.key == key) {
            Some(event) => event.payloads.push(payload.to_vec()),
            None => transcript.events.push(RecordedEvent {
                key: key.clone(),
                payloads: vec![payload.to_vec()],
            }),
        }
    }

    fn load(&self, key: &EventKey) -> Option<RecordedEvent> {
        let mut transcript = self.transcript();
        let occurrences: Vec<&RecordedEvent> =
            transcript.events.iter().filter(|e| &e.key == key).collect();
        let last = occurrences.len().checked_sub(1)?;
        let taken = transcript.replayed.get(key).copied().unwrap_or(0);
        if taken > last {
            debug!(key = %key, occurrences = last + 1, "Occurrences exhausted, repeating last");
        }
        let event = occurrences[taken.min(last)].clone();
        transcript.replayed.insert(key.clone(), taken + 1);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;

    fn flash_request(component: &str) -> Message<DevlinkAttr> {
        Message::request(0x14, DEVLINK_CMD_FLASH_UPDATE, DEVLINK_GENL_VERSION, false)
            .with_attr(DevlinkAttr::BusName("netdevsim".into()))
            .with_attr(DevlinkAttr::DevName("netdevsim7".into()))
            .with_attr(DevlinkAttr::FlashComponent(component.into()))
            .with_attr(DevlinkAttr::FlashFileName("fw.bin".into()))
    }

    #[test]
    fn test_devlink_key() {
        assert_eq!(
            flash_request("fw.mgmt").event_key().as_str(),
            "DevlinkCmd=FLASH_UPDATE,BusName=netdevsim,DevName=netdevsim7,FileName=fw.bin,Component=fw.mgmt"
        );
    }

    #[test]
    fn test_key_ignores_non_identity_fields() {
        let mut a = flash_request("fw");
        let b = flash_request("fw");
        a.header.seq = 99;
        a.push(DevlinkAttr::FlashStatusTimeout(30));
        assert_eq!(a.event_key(), b.event_key());
    }

    #[test]
    fn test_reload_key() {
        let msg: Message<DevlinkAttr> =
            Message::request(0x14, DEVLINK_CMD_RELOAD, DEVLINK_GENL_VERSION, false)
                .with_attr(DevlinkAttr::BusName("pci".into()))
                .with_attr(DevlinkAttr::DevName("0000:01:00.0".into()))
                .with_attr(DevlinkAttr::ReloadAction(DEVLINK_RELOAD_ACTION_FW_ACTIVATE));
        assert_eq!(
            msg.event_key().as_str(),
            "DevlinkCmd=RELOAD,BusName=pci,DevName=0000:01:00.0,ReloadAction=2"
        );
    }

    #[test]
    fn test_repeated_key_keeps_each_occurrence() {
        let store = MemoryEventStore::new();
        let info = EventKey::new("DevlinkCmd=INFO_GET");
        let flash = EventKey::new("DevlinkCmd=FLASH_UPDATE");
        store.begin(&info);
        store.append(&info, b"before");
        store.begin(&flash);
        store.append(&flash, b"ack");
        store.begin(&info);
        store.append(&info, b"after");
        assert_eq!(store.len(), 3);
        assert_eq!(store.keys(), vec![info.clone(), flash.clone(), info.clone()]);

        assert_eq!(store.load(&info).unwrap().payloads, vec![b"before".to_vec()]);
        assert_eq!(store.load(&info).unwrap().payloads, vec![b"after".to_vec()]);
        // Exhausted: the latest answer keeps being served.
        assert_eq!(store.load(&info).unwrap().payloads, vec![b"after".to_vec()]);
        assert_eq!(store.load(&flash).unwrap().payloads, vec![b"ack".to_vec()]);

        store.rewind();
        assert_eq!(store.load(&info).unwrap().payloads, vec![b"before".to_vec()]);
    }

    #[test]
    fn test_occurrences_survive_entries() {
        let store = MemoryEventStore::new();
        let key = EventKey::new("DevlinkCmd=INFO_GET");
        store.begin(&key);
        store.append(&key, &[0x01]);
        store.begin(&key);
        store.append(&key, &[0x02]);

        let restored = MemoryEventStore::from_entries(&store.to_entries()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.load(&key).unwrap().payloads, vec![vec![0x01]]);
        assert_eq!(restored.load(&key).unwrap().payloads, vec![vec![0x02]]);
    }

    #[test]
    fn test_entries_roundtrip() {
        let store = MemoryEventStore::new();
        let key = EventKey::new("DevlinkCmd=INFO_GET");
        store.append(&key, &[0xde, 0xad]);
        let entries = store.to_entries();
        assert_eq!(entries[0].data, vec!["dead".to_string()]);

        let restored = MemoryEventStore::from_entries(&entries).unwrap();
        assert_eq!(restored.load(&key).unwrap().payloads, vec![vec![0xde, 0xad]]);
    }

    #[test]
    fn test_bad_hex_rejected() {
        let entries = vec![EventEntry {
            id: EventKey::new("x"),
            data: vec!["zz".into()],
        }];
        assert!(MemoryEventStore::from_entries(&entries).is_err());
    }
}
