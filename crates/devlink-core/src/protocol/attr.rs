//! Netlink attributes (TLV).
//!
//! Attributes are walked with [`AttrIter`], which yields borrowed
//! [`RawAttr`] views and skips the 4-byte padding between them. Typed
//! attribute sets ([`DevlinkAttr`], [`CtrlAttr`], [`ExtAckAttr`]) implement
//! [`Attribute`] and decode themselves from a `RawAttr`; nested groups are
//! decoded by running another `AttrIter` over the nested payload.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::header::CodecError;

/// Borrowed view of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAttr<'a> {
    /// Attribute type with the nested/byte-order flags stripped.
    pub kind: u16,
    pub nested: bool,
    pub payload: &'a [u8],
}

impl<'a> RawAttr<'a> {
    fn expect_len(&self, expected: usize) -> Result<(), CodecError> {
        if self.payload.len() != expected {
            return Err(CodecError::InvalidAttributeSize {
                kind: self.kind,
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    pub fn as_u8(&self) -> Result<u8, CodecError> {
        self.expect_len(1)?;
        Ok(self.payload[0])
    }

    pub fn as_u16(&self) -> Result<u16, CodecError> {
        self.expect_len(2)?;
        Ok(LittleEndian::read_u16(self.payload))
    }

    pub fn as_u32(&self) -> Result<u32, CodecError> {
        self.expect_len(4)?;
        Ok(LittleEndian::read_u32(self.payload))
    }

    pub fn as_u64(&self) -> Result<u64, CodecError> {
        self.expect_len(8)?;
        Ok(LittleEndian::read_u64(self.payload))
    }

    /// String payload up to the first NUL. Invalid UTF-8 is replaced.
    pub fn as_str(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }

    /// Iterate the attributes nested inside this one.
    pub fn nested_attrs(&self) -> AttrIter<'a> {
        AttrIter::new(self.payload)
    }
}

/// Iterator over a TLV attribute stream.
///
/// Yields an error once and then stops if a length field is malformed.
#[derive(Debug, Clone)]
pub struct AttrIter<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> AttrIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<RawAttr<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + NLA_HDRLEN > self.data.len() {
            return None;
        }
        let rest = &self.data[self.offset..];
        let len = LittleEndian::read_u16(&rest[0..2]) as usize;
        let raw_kind = LittleEndian::read_u16(&rest[2..4]);

        if len < NLA_HDRLEN || len > rest.len() {
            self.done = true;
            return Some(Err(CodecError::InvalidAttributeLength {
                kind: raw_kind & NLA_TYPE_MASK,
                len,
                available: rest.len(),
            }));
        }

        let attr = RawAttr {
            kind: raw_kind & NLA_TYPE_MASK,
            nested: raw_kind & NLA_F_NESTED != 0,
            payload: &rest[NLA_HDRLEN..len],
        };
        // The last attribute may omit its trailing padding.
        self.offset = (self.offset + nl_align(len)).min(self.data.len());
        Some(Ok(attr))
    }
}

fn attr_len(kind: u16, len: usize) -> Result<u16, CodecError> {
    u16::try_from(len).map_err(|_| CodecError::AttributeTooLarge { kind, len })
}

/// Appends attributes to a message buffer.
pub struct AttrWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> AttrWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Append one attribute. Fails without writing anything when the
    /// attribute does not fit the 16-bit length field.
    pub fn put(&mut self, kind: u16, payload: &[u8]) -> Result<(), CodecError> {
        let len = attr_len(kind, NLA_HDRLEN + payload.len())?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(&kind.to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.pad();
        Ok(())
    }

    pub fn put_u8(&mut self, kind: u16, value: u8) -> Result<(), CodecError> {
        self.put(kind, &[value])
    }

    pub fn put_u16(&mut self, kind: u16, value: u16) -> Result<(), CodecError> {
        self.put(kind, &value.to_le_bytes())
    }

    pub fn put_u32(&mut self, kind: u16, value: u32) -> Result<(), CodecError> {
        self.put(kind, &value.to_le_bytes())
    }

    pub fn put_u64(&mut self, kind: u16, value: u64) -> Result<(), CodecError> {
        self.put(kind, &value.to_le_bytes())
    }

    /// NUL-terminated string.
    pub fn put_strz(&mut self, kind: u16, value: &str) -> Result<(), CodecError> {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put(kind, &payload)
    }

    /// Write a nested group; `f` fills in the inner attributes. On failure
    /// the partial group is removed again.
    pub fn put_nested(
        &mut self,
        kind: u16,
        f: impl FnOnce(&mut AttrWriter<'_>) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let start = self.buf.len();
        self.buf.extend_from_slice(&[0, 0]);
        self.buf.extend_from_slice(&(kind | NLA_F_NESTED).to_le_bytes());
        let inner = f(&mut AttrWriter::new(self.buf));
        let len = inner.and_then(|()| attr_len(kind, self.buf.len() - start));
        match len {
            Ok(len) => {
                self.buf[start..start + 2].copy_from_slice(&len.to_le_bytes());
                Ok(())
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    fn pad(&mut self) {
        let aligned = nl_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}

/// A typed attribute set for one netlink context.
pub trait Attribute: Sized {
    /// Highest attribute type known in this context.
    const MAX_TYPE: u16;

    fn encode(&self, w: &mut AttrWriter<'_>) -> Result<(), CodecError>;

    /// Decode one attribute. `Ok(None)` means the type is known but not
    /// modeled, or a nested group is incomplete, and the attribute is skipped.
    fn decode(raw: &RawAttr<'_>) -> Result<Option<Self>, CodecError>;
}

/// Decode a whole attribute stream, ignoring types above `A::MAX_TYPE`.
pub fn decode_attrs<A: Attribute>(data: &[u8]) -> Result<Vec<A>, CodecError> {
    let mut attrs = Vec::new();
    for raw in AttrIter::new(data) {
        let raw = raw?;
        if raw.kind == 0 || raw.kind > A::MAX_TYPE {
            continue;
        }
        if let Some(attr) = A::decode(&raw)? {
            attrs.push(attr);
        }
    }
    Ok(attrs)
}

// ============================================================================
// Devlink
// ============================================================================

/// Which of the three version tables a version entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKind {
    /// Static identification (ASIC id, board id, ...).
    Fixed,
    Running,
    /// Flashed but not yet activated.
    Stored,
}

impl VersionKind {
    fn attr_type(self) -> u16 {
        match self {
            VersionKind::Fixed => DEVLINK_ATTR_INFO_VERSION_FIXED,
            VersionKind::Running => DEVLINK_ATTR_INFO_VERSION_RUNNING,
            VersionKind::Stored => DEVLINK_ATTR_INFO_VERSION_STORED,
        }
    }
}

/// Devlink attributes used by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevlinkAttr {
    BusName(String),
    DevName(String),
    DriverName(String),
    SerialNumber(String),
    BoardSerialNumber(String),
    Version {
        kind: VersionKind,
        name: String,
        value: String,
    },
    FlashFileName(String),
    FlashComponent(String),
    FlashStatusMsg(String),
    FlashStatusDone(u64),
    FlashStatusTotal(u64),
    FlashStatusTimeout(u64),
    ReloadAction(u8),
}

impl Attribute for DevlinkAttr {
    const MAX_TYPE: u16 = DEVLINK_ATTR_MAX;

    fn encode(&self, w: &mut AttrWriter<'_>) -> Result<(), CodecError> {
        match self {
            DevlinkAttr::BusName(s) => w.put_strz(DEVLINK_ATTR_BUS_NAME, s),
            DevlinkAttr::DevName(s) => w.put_strz(DEVLINK_ATTR_DEV_NAME, s),
            DevlinkAttr::DriverName(s) => w.put_strz(DEVLINK_ATTR_INFO_DRIVER_NAME, s),
            DevlinkAttr::SerialNumber(s) => w.put_strz(DEVLINK_ATTR_INFO_SERIAL_NUMBER, s),
            DevlinkAttr::BoardSerialNumber(s) => {
                w.put_strz(DEVLINK_ATTR_INFO_BOARD_SERIAL_NUMBER, s)
            }
            DevlinkAttr::Version { kind, name, value } => {
                w.put_nested(kind.attr_type(), |n| {
                    n.put_strz(DEVLINK_ATTR_INFO_VERSION_NAME, name)?;
                    n.put_strz(DEVLINK_ATTR_INFO_VERSION_VALUE, value)
                })
            }
            DevlinkAttr::FlashFileName(s) => w.put_strz(DEVLINK_ATTR_FLASH_UPDATE_FILE_NAME, s),
            DevlinkAttr::FlashComponent(s) => w.put_strz(DEVLINK_ATTR_FLASH_UPDATE_COMPONENT, s),
            DevlinkAttr::FlashStatusMsg(s) => w.put_strz(DEVLINK_ATTR_FLASH_UPDATE_STATUS_MSG, s),
            DevlinkAttr::FlashStatusDone(v) => w.put_u64(DEVLINK_ATTR_FLASH_UPDATE_STATUS_DONE, *v),
            DevlinkAttr::FlashStatusTotal(v) => {
                w.put_u64(DEVLINK_ATTR_FLASH_UPDATE_STATUS_TOTAL, *v)
            }
            DevlinkAttr::FlashStatusTimeout(v) => {
                w.put_u64(DEVLINK_ATTR_FLASH_UPDATE_STATUS_TIMEOUT, *v)
            }
            DevlinkAttr::ReloadAction(v) => w.put_u8(DEVLINK_ATTR_RELOAD_ACTION, *v),
        }
    }

    fn decode(raw: &RawAttr<'_>) -> Result<Option<Self>, CodecError> {
        let attr = match raw.kind {
            DEVLINK_ATTR_BUS_NAME => DevlinkAttr::BusName(raw.as_str()),
            DEVLINK_ATTR_DEV_NAME => DevlinkAttr::DevName(raw.as_str()),
            DEVLINK_ATTR_INFO_DRIVER_NAME => DevlinkAttr::DriverName(raw.as_str()),
            DEVLINK_ATTR_INFO_SERIAL_NUMBER => DevlinkAttr::SerialNumber(raw.as_str()),
            DEVLINK_ATTR_INFO_BOARD_SERIAL_NUMBER => DevlinkAttr::BoardSerialNumber(raw.as_str()),
            DEVLINK_ATTR_INFO_VERSION_FIXED => return decode_version(raw, VersionKind::Fixed),
            DEVLINK_ATTR_INFO_VERSION_RUNNING => return decode_version(raw, VersionKind::Running),
            DEVLINK_ATTR_INFO_VERSION_STORED => return decode_version(raw, VersionKind::Stored),
            DEVLINK_ATTR_FLASH_UPDATE_FILE_NAME => DevlinkAttr::FlashFileName(raw.as_str()),
            DEVLINK_ATTR_FLASH_UPDATE_COMPONENT => DevlinkAttr::FlashComponent(raw.as_str()),
            DEVLINK_ATTR_FLASH_UPDATE_STATUS_MSG => DevlinkAttr::FlashStatusMsg(raw.as_str()),
            DEVLINK_ATTR_FLASH_UPDATE_STATUS_DONE => DevlinkAttr::FlashStatusDone(raw.as_u64()?),
            DEVLINK_ATTR_FLASH_UPDATE_STATUS_TOTAL => DevlinkAttr::FlashStatusTotal(raw.as_u64()?),
            DEVLINK_ATTR_FLASH_UPDATE_STATUS_TIMEOUT => {
                DevlinkAttr::FlashStatusTimeout(raw.as_u64()?)
            }
            DEVLINK_ATTR_RELOAD_ACTION => DevlinkAttr::ReloadAction(raw.as_u8()?),
            _ => return Ok(None),
        };
        Ok(Some(attr))
    }
}

fn decode_version(raw: &RawAttr<'_>, kind: VersionKind) -> Result<Option<DevlinkAttr>, CodecError> {
    let mut name = None;
    let mut value = None;
    for inner in raw.nested_attrs() {
        let inner = inner?;
        match inner.kind {
            DEVLINK_ATTR_INFO_VERSION_NAME => name = Some(inner.as_str()),
            DEVLINK_ATTR_INFO_VERSION_VALUE => value = Some(inner.as_str()),
            _ => {}
        }
    }
    Ok(match (name, value) {
        (Some(name), Some(value)) => Some(DevlinkAttr::Version { kind, name, value }),
        _ => None,
    })
}

// ============================================================================
// Generic netlink controller
// ============================================================================

/// A multicast group advertised by a generic netlink family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McastGroup {
    pub name: String,
    pub id: u32,
}

/// Controller attributes used for family resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlAttr {
    FamilyId(u16),
    FamilyName(String),
    McastGroups(Vec<McastGroup>),
}

impl Attribute for CtrlAttr {
    const MAX_TYPE: u16 = CTRL_ATTR_MAX;

    fn encode(&self, w: &mut AttrWriter<'_>) -> Result<(), CodecError> {
        match self {
            CtrlAttr::FamilyId(id) => w.put_u16(CTRL_ATTR_FAMILY_ID, *id),
            CtrlAttr::FamilyName(name) => w.put_strz(CTRL_ATTR_FAMILY_NAME, name),
            CtrlAttr::McastGroups(groups) => {
                w.put_nested(CTRL_ATTR_MCAST_GROUPS, |list| {
                    for (idx, group) in groups.iter().enumerate() {
                        list.put_nested(idx as u16 + 1, |g| {
                            g.put_u32(CTRL_ATTR_MCAST_GRP_ID, group.id)?;
                            g.put_strz(CTRL_ATTR_MCAST_GRP_NAME, &group.name)
                        })?;
                    }
                    Ok(())
                })
            }
        }
    }

    fn decode(raw: &RawAttr<'_>) -> Result<Option<Self>, CodecError> {
        let attr = match raw.kind {
            CTRL_ATTR_FAMILY_ID => CtrlAttr::FamilyId(raw.as_u16()?),
            CTRL_ATTR_FAMILY_NAME => CtrlAttr::FamilyName(raw.as_str()),
            CTRL_ATTR_MCAST_GROUPS => {
                let mut groups = Vec::new();
                for entry in raw.nested_attrs() {
                    let entry = entry?;
                    let mut name = None;
                    let mut id = None;
                    for field in entry.nested_attrs() {
                        let field = field?;
                        match field.kind {
                            CTRL_ATTR_MCAST_GRP_NAME => name = Some(field.as_str()),
                            CTRL_ATTR_MCAST_GRP_ID => id = Some(field.as_u32()?),
                            _ => {}
                        }
                    }
                    if let (Some(name), Some(id)) = (name, id) {
                        groups.push(McastGroup { name, id });
                    }
                }
                CtrlAttr::McastGroups(groups)
            }
            _ => return Ok(None),
        };
        Ok(Some(attr))
    }
}

// ============================================================================
// Extended ACK
// ============================================================================

/// Attributes trailing an `NLMSG_ERROR` when `NLM_F_ACK_TLVS` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtAckAttr {
    Msg(String),
    Offset(u32),
}

impl Attribute for ExtAckAttr {
    const MAX_TYPE: u16 = NLMSGERR_ATTR_MAX;

    fn encode(&self, w: &mut AttrWriter<'_>) -> Result<(), CodecError> {
        match self {
            ExtAckAttr::Msg(msg) => w.put_strz(NLMSGERR_ATTR_MSG, msg),
            ExtAckAttr::Offset(off) => w.put_u32(NLMSGERR_ATTR_OFFS, *off),
        }
    }

    fn decode(raw: &RawAttr<'_>) -> Result<Option<Self>, CodecError> {
        Ok(match raw.kind {
            NLMSGERR_ATTR_MSG => Some(ExtAckAttr::Msg(raw.as_str())),
            NLMSGERR_ATTR_OFFS => Some(ExtAckAttr::Offset(raw.as_u32()?)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all<A: Attribute>(attrs: &[A]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = AttrWriter::new(&mut buf);
        for a in attrs {
            a.encode(&mut w).unwrap();
        }
        buf
    }

    #[test]
    fn test_padding_is_skipped() {
        // "pci\0" needs no padding, "ab\0" needs one byte.
        let attrs = vec![
            DevlinkAttr::DevName("ab".into()),
            DevlinkAttr::BusName("pci".into()),
            DevlinkAttr::ReloadAction(DEVLINK_RELOAD_ACTION_FW_ACTIVATE),
            DevlinkAttr::FlashStatusDone(7),
        ];
        let buf = encode_all(&attrs);
        assert_eq!(buf.len() % NL_ALIGNTO, 0);
        assert_eq!(decode_attrs::<DevlinkAttr>(&buf).unwrap(), attrs);
    }

    #[test]
    fn test_nested_version_roundtrip() {
        let attrs = vec![
            DevlinkAttr::DriverName("mlx5_core".into()),
            DevlinkAttr::Version {
                kind: VersionKind::Fixed,
                name: "fw.psid".into(),
                value: "MT_0000000008".into(),
            },
            DevlinkAttr::Version {
                kind: VersionKind::Stored,
                name: "fw".into(),
                value: "22.36.1010".into(),
            },
        ];
        let buf = encode_all(&attrs);
        assert_eq!(decode_attrs::<DevlinkAttr>(&buf).unwrap(), attrs);
    }

    #[test]
    fn test_incomplete_version_group_skipped() {
        let mut buf = Vec::new();
        let mut w = AttrWriter::new(&mut buf);
        w.put_nested(DEVLINK_ATTR_INFO_VERSION_RUNNING, |n| {
            n.put_strz(DEVLINK_ATTR_INFO_VERSION_NAME, "fw")
        })
        .unwrap();
        w.put_strz(DEVLINK_ATTR_BUS_NAME, "pci").unwrap();
        assert_eq!(
            decode_attrs::<DevlinkAttr>(&buf).unwrap(),
            vec![DevlinkAttr::BusName("pci".into())]
        );
    }

    #[test]
    fn test_unknown_types_ignored() {
        let mut buf = Vec::new();
        let mut w = AttrWriter::new(&mut buf);
        w.put_u32(DEVLINK_ATTR_MAX + 10, 5).unwrap();
        w.put_u32(80, 5).unwrap(); // known to the kernel, not modeled here
        w.put_strz(DEVLINK_ATTR_DEV_NAME, "netdevsim1").unwrap();
        assert_eq!(
            decode_attrs::<DevlinkAttr>(&buf).unwrap(),
            vec![DevlinkAttr::DevName("netdevsim1".into())]
        );
    }

    #[test]
    fn test_malformed_length() {
        // Declares 32 bytes but only 8 are present.
        let buf = [32u8, 0, 1, 0, b'p', b'c', b'i', 0];
        let err = decode_attrs::<DevlinkAttr>(&buf).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidAttributeLength { len: 32, .. }
        ));
    }

    #[test]
    fn test_wrong_integer_size() {
        let mut buf = Vec::new();
        AttrWriter::new(&mut buf)
            .put_u32(DEVLINK_ATTR_FLASH_UPDATE_STATUS_DONE, 1)
            .unwrap();
        assert!(matches!(
            decode_attrs::<DevlinkAttr>(&buf),
            Err(CodecError::InvalidAttributeSize { expected: 8, .. })
        ));
    }

    #[test]
    fn test_ctrl_mcast_groups() {
        let attrs = vec![
            CtrlAttr::FamilyName(DEVLINK_GENL_NAME.into()),
            CtrlAttr::FamilyId(0x15),
            CtrlAttr::McastGroups(vec![McastGroup {
                name: DEVLINK_GENL_MCGRP_CONFIG_NAME.into(),
                id: 6,
            }]),
        ];
        let buf = encode_all(&attrs);
        assert_eq!(decode_attrs::<CtrlAttr>(&buf).unwrap(), attrs);
    }

    #[test]
    fn test_string_without_nul() {
        let mut buf = Vec::new();
        AttrWriter::new(&mut buf).put(DEVLINK_ATTR_BUS_NAME, b"pci").unwrap();
        assert_eq!(
            decode_attrs::<DevlinkAttr>(&buf).unwrap(),
            vec![DevlinkAttr::BusName("pci".into())]
        );
    }

    #[test]
    fn test_oversized_attribute_rejected() {
        let mut buf = Vec::new();
        let name = "x".repeat(usize::from(u16::MAX));
        let err = AttrWriter::new(&mut buf)
            .put_strz(DEVLINK_ATTR_FLASH_UPDATE_FILE_NAME, &name)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::AttributeTooLarge {
                kind: DEVLINK_ATTR_FLASH_UPDATE_FILE_NAME,
                ..
            }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_nested_group_removed() {
        let mut buf = Vec::new();
        let mut w = AttrWriter::new(&mut buf);
        w.put_strz(DEVLINK_ATTR_BUS_NAME, "pci").unwrap();
        let value = "1".repeat(40_000);
        let err = w
            .put_nested(DEVLINK_ATTR_INFO_VERSION_STORED, |n| {
                n.put_strz(DEVLINK_ATTR_INFO_VERSION_NAME, &value)?;
                n.put_strz(DEVLINK_ATTR_INFO_VERSION_VALUE, &value)
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::AttributeTooLarge { len, .. } if len > 65535));
        assert_eq!(
            decode_attrs::<DevlinkAttr>(&buf).unwrap(),
            vec![DevlinkAttr::BusName("pci".into())]
        );
    }
}
