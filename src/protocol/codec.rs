//! Encoders and parsers for the three fragment-protocol messages.
//!
//! Pure functions, no I/O. Parsing is fail-closed: a bad CRC, wrong protocol
//! version, or inconsistent length yields an error and nothing else happens.

use bytes::BufMut;

use super::{crc, CRC_LEN, FRAGMENT_HEADER_LEN, MIN_DATA_LEN, PROTOCOL_VERSION};
use crate::error::LinkError;

pub const TYPE_DATA: u8 = 0x01;
pub const TYPE_NACK: u8 = 0x02;
pub const TYPE_DONE: u8 = 0x03;

/// A NACK carries a one-byte index count, so one round can name at most this
/// many missing fragments; the rest are picked up by later rounds.
pub const MAX_NACK_INDICES: usize = 255;

/// Fixed 13-byte header leading every DATA fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub msg_id: u16,
    /// Declared length of the whole reassembled message.
    pub total_len: u32,
    pub frag_index: u16,
    pub frag_count: u16,
    pub payload_len: u8,
}

/// Second byte of every fragment-protocol message, if present.
pub fn peek_type(buf: &[u8]) -> Option<u8> {
    buf.get(1).copied()
}

/// Build a complete DATA message: header, payload, CRC trailer.
pub fn encode_data(header: &FragmentHeader, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(payload.len(), header.payload_len as usize);
    let mut out = Vec::with_capacity(FRAGMENT_HEADER_LEN + payload.len() + CRC_LEN);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(TYPE_DATA);
    out.put_u16(header.msg_id);
    out.put_u32(header.total_len);
    out.put_u16(header.frag_index);
    out.put_u16(header.frag_count);
    out.put_u8(header.payload_len);
    out.put_slice(payload);
    crc::append(&mut out);
    out
}

/// Parse a DATA message, returning the header and a borrow of its payload.
pub fn parse_data(buf: &[u8]) -> Result<(FragmentHeader, &[u8]), LinkError> {
    if buf.len() < MIN_DATA_LEN {
        return Err(LinkError::Parse("data fragment shorter than header"));
    }
    if !crc::verify(buf) {
        return Err(LinkError::Crc);
    }
    if buf[0] != PROTOCOL_VERSION {
        return Err(LinkError::Parse("unknown protocol version"));
    }
    if buf[1] != TYPE_DATA {
        return Err(LinkError::Parse("not a data fragment"));
    }
    let header = FragmentHeader {
        msg_id: u16::from_be_bytes([buf[2], buf[3]]),
        total_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        frag_index: u16::from_be_bytes([buf[8], buf[9]]),
        frag_count: u16::from_be_bytes([buf[10], buf[11]]),
        payload_len: buf[12],
    };
    if buf.len() != FRAGMENT_HEADER_LEN + header.payload_len as usize + CRC_LEN {
        return Err(LinkError::Parse("payload length disagrees with message size"));
    }
    let payload = &buf[FRAGMENT_HEADER_LEN..FRAGMENT_HEADER_LEN + header.payload_len as usize];
    Ok((header, payload))
}

/// Build a NACK naming the still-missing fragment indices of `msg_id`.
pub fn encode_nack(msg_id: u16, missing: &[u16]) -> Vec<u8> {
    debug_assert!(missing.len() <= MAX_NACK_INDICES);
    let mut out = Vec::with_capacity(5 + missing.len() * 2 + CRC_LEN);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(TYPE_NACK);
    out.put_u16(msg_id);
    out.put_u8(missing.len() as u8);
    for &idx in missing {
        out.put_u16(idx);
    }
    crc::append(&mut out);
    out
}

/// Parse a NACK into its message id and missing-index list.
pub fn parse_nack(buf: &[u8]) -> Result<(u16, Vec<u16>), LinkError> {
    if buf.len() < 5 + CRC_LEN {
        return Err(LinkError::Parse("nack shorter than fixed fields"));
    }
    if !crc::verify(buf) {
        return Err(LinkError::Crc);
    }
    if buf[0] != PROTOCOL_VERSION {
        return Err(LinkError::Parse("unknown protocol version"));
    }
    if buf[1] != TYPE_NACK {
        return Err(LinkError::Parse("not a nack"));
    }
    let msg_id = u16::from_be_bytes([buf[2], buf[3]]);
    let count = buf[4] as usize;
    if buf.len() != 5 + count * 2 + CRC_LEN {
        return Err(LinkError::Parse("nack index count disagrees with message size"));
    }
    let mut missing = Vec::with_capacity(count);
    for i in 0..count {
        let off = 5 + i * 2;
        missing.push(u16::from_be_bytes([buf[off], buf[off + 1]]));
    }
    Ok((msg_id, missing))
}

/// Build the 6-byte DONE acknowledgement for `msg_id`.
pub fn encode_done(msg_id: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + CRC_LEN);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(TYPE_DONE);
    out.put_u16(msg_id);
    crc::append(&mut out);
    out
}

/// Parse a DONE, returning the acknowledged message id.
pub fn parse_done(buf: &[u8]) -> Result<u16, LinkError> {
    if buf.len() != 4 + CRC_LEN {
        return Err(LinkError::Parse("done has wrong length"));
    }
    if !crc::verify(buf) {
        return Err(LinkError::Crc);
    }
    if buf[0] != PROTOCOL_VERSION {
        return Err(LinkError::Parse("unknown protocol version"));
    }
    if buf[1] != TYPE_DONE {
        return Err(LinkError::Parse("not a done"));
    }
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}
