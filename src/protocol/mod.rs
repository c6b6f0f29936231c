//! Reliable fragment protocol carried over one-hop RF frames.
//!
//! Application messages up to 10 KiB are split into small DATA fragments, each
//! guarded by a CRC-16/CCITT trailer. The receiver reassembles fragments into
//! the original message, asks for still-missing pieces with selective NACKs,
//! and confirms full delivery with a DONE. The underlying radio link is a
//! lossy datagram channel with no ordering guarantees; everything here is
//! designed to tolerate reordering, duplication, and loss.
//!
//! Wire formats (all multi-byte fields big-endian):
//!
//! ```text
//! DATA  version(1) 0x01(1) msg_id(2) total_len(4) frag_idx(2) frag_cnt(2) payload_len(1) payload crc(2)
//! NACK  version(1) 0x02(1) msg_id(2) count(1) count*index(2) crc(2)
//! DONE  version(1) 0x03(1) msg_id(2) crc(2)
//! ```

pub mod codec;
pub mod crc;
pub mod receiver;
pub mod session;
pub mod transmitter;

use std::time::Duration;

/// Fragment protocol version carried in every message.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed DATA header size in bytes.
pub const FRAGMENT_HEADER_LEN: usize = 13;

/// CRC trailer size in bytes.
pub const CRC_LEN: usize = 2;

/// Smallest well-formed DATA message: header plus CRC, empty payload.
pub const MIN_DATA_LEN: usize = FRAGMENT_HEADER_LEN + CRC_LEN;

/// Default payload bytes per fragment.
pub const DEFAULT_FRAGMENT_PAYLOAD: usize = 30;

/// Upper bound on the per-fragment payload, leaving headroom for radio
/// encryption overhead in the RF frame.
pub const MAX_FRAGMENT_PAYLOAD: usize = 34;

/// Largest application message the protocol will carry.
pub const MAX_MESSAGE_LEN: usize = 10_240;

/// Inactivity bound before a receive session is prompted to NACK.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_millis(500);

/// Total lifetime bound for any session, either direction.
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Minimum spacing between two NACKs for the same session.
pub const NACK_INTERVAL: Duration = Duration::from_millis(200);

/// NACK rounds allowed before a receive session is abandoned.
pub const MAX_NACK_ROUNDS: u32 = 10;

/// Cadence of the session housekeeping sweep.
pub const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(500);

/// One RF payload headed for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfOut {
    pub dest: u64,
    pub payload: Vec<u8>,
}

/// A fully reassembled inbound message with the reported sender address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub data: Vec<u8>,
    pub source: u64,
}
