//! XBee API Mode 2 frame construction.
//!
//! Outgoing frames are `0x7E || len_hi || len_lo || body || checksum` with the
//! checksum computed as `0xFF - (sum(body) mod 256)`. After framing, every
//! byte except the leading start delimiter is escape-encoded: the four
//! reserved bytes {0x7E, 0x7D, 0x11, 0x13} become `0x7D, byte ^ 0x20`.

use bytes::BufMut;

pub const START_DELIMITER: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
pub const ESCAPE_MASK: u8 = 0x20;

pub const FRAME_TX_REQUEST: u8 = 0x10;
pub const FRAME_AT_COMMAND: u8 = 0x08;
pub const FRAME_RX_PACKET: u8 = 0x90;
pub const FRAME_EXPLICIT_RX: u8 = 0x91;
pub const FRAME_TX_STATUS: u8 = 0x8B;
pub const FRAME_AT_RESPONSE: u8 = 0x88;

/// DigiMesh broadcast 64-bit address.
pub const BROADCAST_ADDR: u64 = 0x0000_0000_0000_FFFF;
/// "Unknown" 16-bit network address, used whenever addressing is 64-bit.
pub const UNKNOWN_ADDR16: u16 = 0xFFFE;

/// Largest frame body the stream parser will accept.
pub const MAX_FRAME_LEN: usize = 256;

/// Inbound API frames, discriminated by frame type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// 0x90: a one-hop RF payload addressed to us.
    RxPacket {
        src64: u64,
        src16: u16,
        options: u8,
        rf_data: Vec<u8>,
    },
    /// 0x91: explicit-addressing variant of 0x90; promoted to an RxPacket
    /// downstream so the fragment layer sees one shape.
    ExplicitRx {
        src64: u64,
        src16: u16,
        src_endpoint: u8,
        dst_endpoint: u8,
        cluster: u16,
        profile: u16,
        options: u8,
        rf_data: Vec<u8>,
    },
    /// 0x8B: the radio's verdict on an earlier transmit request.
    TxStatus {
        frame_id: u8,
        dest16: u16,
        retries: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    /// 0x88: reply to a local AT command.
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: u8,
        data: Vec<u8>,
    },
}

/// API frame checksum over the body.
pub fn checksum(body: &[u8]) -> u8 {
    0xFFu8.wrapping_sub(body.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)))
}

fn needs_escape(b: u8) -> bool {
    matches!(b, START_DELIMITER | ESCAPE | XON | XOFF)
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if needs_escape(b) {
        out.push(ESCAPE);
        out.push(b ^ ESCAPE_MASK);
    } else {
        out.push(b);
    }
}

/// Wrap a frame body in Mode 2 framing, escaping everything after the start
/// delimiter.
pub fn encode(body: &[u8]) -> Vec<u8> {
    debug_assert!(!body.is_empty() && body.len() <= MAX_FRAME_LEN);
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(START_DELIMITER);
    for b in (body.len() as u16).to_be_bytes() {
        push_escaped(&mut out, b);
    }
    for &b in body {
        push_escaped(&mut out, b);
    }
    push_escaped(&mut out, checksum(body));
    out
}

/// Build an escaped Transmit Request (0x10). A frame id of zero tells the
/// radio not to report a transmit status.
pub fn encode_transmit_request(frame_id: u8, dest: u64, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(14 + payload.len());
    body.put_u8(FRAME_TX_REQUEST);
    body.put_u8(frame_id);
    body.put_u64(dest);
    body.put_u16(UNKNOWN_ADDR16);
    body.put_u8(0); // broadcast radius: radio NH setting
    body.put_u8(0); // transmit options: radio TO setting
    body.put_slice(payload);
    encode(&body)
}

/// Build an escaped local AT Command frame (0x08).
pub fn encode_at_command(frame_id: u8, command: [u8; 2], parameter: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + parameter.len());
    body.put_u8(FRAME_AT_COMMAND);
    body.put_u8(frame_id);
    body.put_slice(&command);
    body.put_slice(parameter);
    encode(&body)
}
