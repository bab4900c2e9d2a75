//! Whole generic netlink messages.

use byteorder::{ByteOrder, LittleEndian};

use super::attr::{Attribute, AttrWriter, DevlinkAttr, ExtAckAttr, decode_attrs};
use super::constants::*;
use super::header::{CodecError, GenlMsgHdr, NlMsgHdr};

/// One netlink frame inside a datagram, before the payload is interpreted.
#[derive(Debug, Clone, Copy)]
pub struct NlFrame<'a> {
    pub header: NlMsgHdr,
    /// Bytes after the `nlmsghdr`, up to `nlmsg_len`.
    pub payload: &'a [u8],
}

/// Contents of an `NLMSG_ERROR` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPayload {
    /// Negative errno, or 0 for a plain acknowledgment.
    pub error: i32,
    /// Extended ACK message text.
    pub ext_msg: Option<String>,
}

impl<'a> NlFrame<'a> {
    pub fn is_error(&self) -> bool {
        self.header.kind == NLMSG_ERROR
    }

    pub fn is_done(&self) -> bool {
        self.header.kind == NLMSG_DONE
    }

    /// Parse an `NLMSG_ERROR` payload, including extended ACK attributes.
    pub fn ack(&self) -> Result<AckPayload, CodecError> {
        if self.payload.len() < 4 {
            return Err(CodecError::BufferTooSmall {
                expected: 4,
                actual: self.payload.len(),
            });
        }
        let error = LittleEndian::read_i32(&self.payload[0..4]);
        let mut ext_msg = None;

        if self.header.flags & NLM_F_ACK_TLVS != 0 {
            // The original request header follows, with its payload unless capped.
            let orig = NlMsgHdr::from_bytes(&self.payload[4..])?;
            let orig_len = if self.header.flags & NLM_F_CAPPED != 0 {
                NlMsgHdr::SIZE
            } else {
                nl_align(orig.len as usize)
            };
            let tlv_start = 4 + orig_len;
            if tlv_start <= self.payload.len() {
                for attr in decode_attrs::<ExtAckAttr>(&self.payload[tlv_start..])? {
                    if let ExtAckAttr::Msg(msg) = attr {
                        ext_msg = Some(msg);
                    }
                }
            }
        }

        Ok(AckPayload { error, ext_msg })
    }
}

impl AckPayload {
    /// Serialize as the kernel answers `request`: the request header is
    /// echoed capped, followed by the extack message when present.
    pub fn encode(&self, request: &NlMsgHdr) -> Result<Vec<u8>, CodecError> {
        let mut flags = NLM_F_CAPPED;
        if self.ext_msg.is_some() {
            flags |= NLM_F_ACK_TLVS;
        }
        let mut buf = Vec::with_capacity(64);
        NlMsgHdr::new(NLMSG_ERROR, flags, request.seq).write_to(&mut buf);
        buf.extend_from_slice(&self.error.to_le_bytes());
        request.write_to(&mut buf);
        if let Some(msg) = &self.ext_msg {
            AttrWriter::new(&mut buf).put_strz(NLMSGERR_ATTR_MSG, msg)?;
        }
        let len = buf.len() as u32;
        NlMsgHdr::patch_len(&mut buf, 0, len);
        Ok(buf)
    }
}

/// `NLMSG_DONE` frame terminating a dump.
pub fn done_frame(seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NlMsgHdr::SIZE + 4);
    NlMsgHdr::new(NLMSG_DONE, NLM_F_MULTI, seq).write_to(&mut buf);
    buf.extend_from_slice(&0i32.to_le_bytes());
    let len = buf.len() as u32;
    NlMsgHdr::patch_len(&mut buf, 0, len);
    buf
}

/// Iterator over the netlink frames packed into one datagram.
pub struct NlFrames<'a> {
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> NlFrames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for NlFrames<'a> {
    type Item = Result<NlFrame<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + NlMsgHdr::SIZE > self.data.len() {
            return None;
        }
        let rest = &self.data[self.offset..];
        let header = match NlMsgHdr::from_bytes(rest) {
            Ok(h) => h,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let len = header.len as usize;
        if len < NlMsgHdr::SIZE || len > rest.len() {
            self.done = true;
            return Some(Err(CodecError::InvalidMessageLength {
                len,
                offset: self.offset,
                available: self.data.len(),
            }));
        }
        self.offset = (self.offset + nl_align(len)).min(self.data.len());
        Some(Ok(NlFrame {
            header,
            payload: &rest[NlMsgHdr::SIZE..len],
        }))
    }
}

/// A generic netlink message with typed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<A> {
    pub header: NlMsgHdr,
    pub genl: GenlMsgHdr,
    pub attrs: Vec<A>,
}

impl<A: Attribute> Message<A> {
    /// New request for `family`. Always asks for an ACK; `dump` adds
    /// `NLM_F_DUMP` for enumeration.
    pub fn request(family: u16, cmd: u8, version: u8, dump: bool) -> Self {
        let mut flags = NLM_F_REQUEST | NLM_F_ACK;
        if dump {
            flags |= NLM_F_DUMP;
        }
        Self {
            header: NlMsgHdr::new(family, flags, 0),
            genl: GenlMsgHdr::new(cmd, version),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, attr: A) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn push(&mut self, attr: A) {
        self.attrs.push(attr);
    }

    pub fn cmd(&self) -> u8 {
        self.genl.cmd
    }

    pub fn is_dump(&self) -> bool {
        self.header.flags & NLM_F_DUMP == NLM_F_DUMP
    }

    /// Append the serialized message to `buf` and return the final header.
    /// Nothing is appended when an attribute cannot be encoded.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<NlMsgHdr, CodecError> {
        let start = buf.len();
        self.header.write_to(buf);
        self.genl.write_to(buf);
        let mut w = AttrWriter::new(buf);
        if let Err(e) = self.attrs.iter().try_for_each(|attr| attr.encode(&mut w)) {
            buf.truncate(start);
            return Err(e);
        }
        let len = (buf.len() - start) as u32;
        NlMsgHdr::patch_len(buf, start, len);
        Ok(NlMsgHdr { len, ..self.header })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(64);
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one frame as a generic netlink message.
    pub fn from_frame(frame: &NlFrame<'_>) -> Result<Self, CodecError> {
        let genl = GenlMsgHdr::from_bytes(frame.payload)?;
        let attrs = decode_attrs(&frame.payload[GenlMsgHdr::SIZE..])?;
        Ok(Self {
            header: frame.header,
            genl,
            attrs,
        })
    }

    /// Decode the first message in `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        match NlFrames::new(bytes).next() {
            Some(frame) => Self::from_frame(&frame?),
            None => Err(CodecError::BufferTooSmall {
                expected: NlMsgHdr::SIZE,
                actual: bytes.len(),
            }),
        }
    }
}

impl Message<DevlinkAttr> {
    pub fn bus_name(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            DevlinkAttr::BusName(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn dev_name(&self) -> Option<&str> {
        self.attrs.iter().find_map(|a| match a {
            DevlinkAttr::DevName(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// True if the message carries the given bus/dev handle.
    pub fn is_for(&self, bus_name: &str, dev_name: &str) -> bool {
        self.bus_name() == Some(bus_name) && self.dev_name() == Some(dev_name)
    }
}
