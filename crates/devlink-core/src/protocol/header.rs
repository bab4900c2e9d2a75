//! Fixed headers of a generic netlink message.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

use super::constants::{GENL_HDRLEN, NLMSG_HDRLEN};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Invalid message length {len} at offset {offset} (buffer {available})")]
    InvalidMessageLength {
        len: usize,
        offset: usize,
        available: usize,
    },
    #[error("Invalid attribute length {len} for type {kind} (remaining {available})")]
    InvalidAttributeLength {
        kind: u16,
        len: usize,
        available: usize,
    },
    #[error("Attribute {kind} has wrong payload size: expected {expected}, got {actual}")]
    InvalidAttributeSize {
        kind: u16,
        expected: usize,
        actual: usize,
    },
    #[error("Attribute {kind} of {len} bytes exceeds the netlink length field")]
    AttributeTooLarge { kind: u16, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `struct nlmsghdr` (16 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub len: u32,
    pub kind: u16,
    pub flags: u16,
    pub seq: u32,
    pub port_id: u32,
}

impl NlMsgHdr {
    pub const SIZE: usize = NLMSG_HDRLEN;

    pub fn new(kind: u16, flags: u16, seq: u32) -> Self {
        Self {
            len: Self::SIZE as u32,
            kind,
            flags,
            seq,
            port_id: 0,
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        // Writes into a Vec cannot fail.
        let _ = buf.write_u32::<LittleEndian>(self.len);
        let _ = buf.write_u16::<LittleEndian>(self.kind);
        let _ = buf.write_u16::<LittleEndian>(self.flags);
        let _ = buf.write_u32::<LittleEndian>(self.seq);
        let _ = buf.write_u32::<LittleEndian>(self.port_id);
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            len: cursor.read_u32::<LittleEndian>()?,
            kind: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            seq: cursor.read_u32::<LittleEndian>()?,
            port_id: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Patch the length field of a header already serialized at `offset`.
    pub fn patch_len(buf: &mut [u8], offset: usize, len: u32) {
        buf[offset..offset + 4].copy_from_slice(&len.to_le_bytes());
    }
}

/// `struct genlmsghdr` (4 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenlMsgHdr {
    pub cmd: u8,
    pub version: u8,
    pub reserved: u16,
}

impl GenlMsgHdr {
    pub const SIZE: usize = GENL_HDRLEN;

    pub fn new(cmd: u8, version: u8) -> Self {
        Self {
            cmd,
            version,
            reserved: 0,
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.cmd);
        buf.push(self.version);
        let _ = buf.write_u16::<LittleEndian>(self.reserved);
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            cmd: cursor.read_u8()?,
            version: cursor.read_u8()?,
            reserved: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nlmsghdr_roundtrip() {
        let mut hdr = NlMsgHdr::new(0x1234, 0x0305, 42);
        hdr.port_id = 7;
        let mut buf = Vec::new();
        hdr.write_to(&mut buf);
        assert_eq!(buf.len(), NlMsgHdr::SIZE);

        let parsed = NlMsgHdr::from_bytes(&buf).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn test_patch_len() {
        let mut buf = Vec::new();
        NlMsgHdr::new(1, 0, 0).write_to(&mut buf);
        NlMsgHdr::patch_len(&mut buf, 0, 0x40);
        assert_eq!(NlMsgHdr::from_bytes(&buf).unwrap().len, 0x40);
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(
            GenlMsgHdr::from_bytes(&[1, 2]),
            Err(CodecError::BufferTooSmall {
                expected: 4,
                actual: 2
            })
        ));
    }
}
