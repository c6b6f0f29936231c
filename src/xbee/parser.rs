//! Streaming parser for API Mode 2 frames.
//!
//! Fed arbitrary byte chunks from the serial port, yields typed frames as
//! they complete. A start delimiter re-synchronizes the machine from any
//! state, so a corrupted or truncated frame costs at most the bytes up to the
//! next `0x7E`.

use log::{debug, warn};

use super::frame::{
    ApiFrame, ESCAPE, ESCAPE_MASK, FRAME_AT_RESPONSE, FRAME_EXPLICIT_RX, FRAME_RX_PACKET,
    FRAME_TX_STATUS, MAX_FRAME_LEN, START_DELIMITER,
};
use crate::logutil::hex_snippet;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForStart,
    LengthMsb,
    LengthLsb,
    FrameData,
    Checksum,
}

#[derive(Debug)]
pub struct FrameParser {
    state: State,
    escape: bool,
    length: usize,
    /// Scratch for the current frame body; reused across frames.
    body: Vec<u8>,
    /// Running sum of body bytes plus the trailing checksum.
    sum: u8,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            state: State::WaitingForStart,
            escape: false,
            length: 0,
            body: Vec::with_capacity(MAX_FRAME_LEN),
            sum: 0,
        }
    }

    /// Feed raw serial bytes; returns every frame completed by this chunk.
    pub fn push(&mut self, data: &[u8]) -> Vec<ApiFrame> {
        let mut frames = Vec::new();
        for &raw in data {
            // A start delimiter opens a new frame from any state, abandoning
            // whatever was in progress.
            if raw == START_DELIMITER {
                if self.state == State::FrameData || self.state == State::Checksum {
                    debug!("start delimiter inside a frame, resyncing");
                }
                self.state = State::LengthMsb;
                self.escape = false;
                self.sum = 0;
                continue;
            }
            if self.state == State::WaitingForStart {
                // Junk between frames, including stray escape bytes.
                continue;
            }
            let byte = if self.escape {
                self.escape = false;
                raw ^ ESCAPE_MASK
            } else if raw == ESCAPE {
                self.escape = true;
                continue;
            } else {
                raw
            };
            match self.state {
                State::LengthMsb => {
                    self.length = (byte as usize) << 8;
                    self.state = State::LengthLsb;
                }
                State::LengthLsb => {
                    self.length |= byte as usize;
                    if self.length == 0 || self.length > MAX_FRAME_LEN {
                        warn!("api frame with implausible length {}", self.length);
                        self.reset();
                    } else {
                        self.body.clear();
                        self.state = State::FrameData;
                    }
                }
                State::FrameData => {
                    self.sum = self.sum.wrapping_add(byte);
                    self.body.push(byte);
                    if self.body.len() == self.length {
                        self.state = State::Checksum;
                    }
                }
                State::Checksum => {
                    self.sum = self.sum.wrapping_add(byte);
                    if self.sum == 0xFF {
                        if let Some(frame) = decode_body(&self.body) {
                            frames.push(frame);
                        }
                    } else {
                        metrics::inc_crc_failures();
                        warn!(
                            "api frame checksum mismatch, dropping {} bytes",
                            self.body.len()
                        );
                    }
                    self.reset();
                }
                State::WaitingForStart => unreachable!("handled above"),
            }
        }
        frames
    }

    fn reset(&mut self) {
        self.state = State::WaitingForStart;
        self.escape = false;
        self.length = 0;
        self.body.clear();
        self.sum = 0;
    }
}

/// Parse a checksum-valid frame body into a typed frame. Unknown types and
/// under-length bodies are dropped with a log line.
fn decode_body(body: &[u8]) -> Option<ApiFrame> {
    let frame_type = body[0];
    match frame_type {
        FRAME_RX_PACKET => {
            if body.len() < 12 {
                warn!("short rx packet frame ({} bytes)", body.len());
                return None;
            }
            Some(ApiFrame::RxPacket {
                src64: u64::from_be_bytes(body[1..9].try_into().ok()?),
                src16: u16::from_be_bytes([body[9], body[10]]),
                options: body[11],
                rf_data: body[12..].to_vec(),
            })
        }
        FRAME_EXPLICIT_RX => {
            if body.len() < 18 {
                warn!("short explicit rx frame ({} bytes)", body.len());
                return None;
            }
            Some(ApiFrame::ExplicitRx {
                src64: u64::from_be_bytes(body[1..9].try_into().ok()?),
                src16: u16::from_be_bytes([body[9], body[10]]),
                src_endpoint: body[11],
                dst_endpoint: body[12],
                cluster: u16::from_be_bytes([body[13], body[14]]),
                profile: u16::from_be_bytes([body[15], body[16]]),
                options: body[17],
                rf_data: body[18..].to_vec(),
            })
        }
        FRAME_TX_STATUS => {
            if body.len() < 7 {
                warn!("short tx status frame ({} bytes)", body.len());
                return None;
            }
            Some(ApiFrame::TxStatus {
                frame_id: body[1],
                dest16: u16::from_be_bytes([body[2], body[3]]),
                retries: body[4],
                delivery_status: body[5],
                discovery_status: body[6],
            })
        }
        FRAME_AT_RESPONSE => {
            if body.len() < 5 {
                warn!("short at response frame ({} bytes)", body.len());
                return None;
            }
            Some(ApiFrame::AtResponse {
                frame_id: body[1],
                command: [body[2], body[3]],
                status: body[4],
                data: body[5..].to_vec(),
            })
        }
        other => {
            debug!(
                "ignoring api frame type {:#04x} ({})",
                other,
                hex_snippet(body, 16)
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xbee::frame::{encode, encode_transmit_request};

    fn rx_packet_body(src64: u64, rf_data: &[u8]) -> Vec<u8> {
        let mut body = vec![FRAME_RX_PACKET];
        body.extend_from_slice(&src64.to_be_bytes());
        body.extend_from_slice(&0xFFFEu16.to_be_bytes());
        body.push(0x01);
        body.extend_from_slice(rf_data);
        body
    }

    #[test]
    fn parses_rx_packet_fed_byte_by_byte() {
        let wire = encode(&rx_packet_body(0x0013_A200_4000_0001, b"hi"));
        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for &b in &wire {
            frames.extend(parser.push(&[b]));
        }
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            ApiFrame::RxPacket {
                src64, rf_data, ..
            } => {
                assert_eq!(*src64, 0x0013_A200_4000_0001);
                assert_eq!(rf_data, b"hi");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn resyncs_after_junk_and_stray_escape() {
        let wire = encode(&rx_packet_body(0x42, b"x"));
        let mut input = vec![0x7D, 0x00, 0xAA];
        input.extend_from_slice(&wire);
        let mut parser = FrameParser::new();
        let frames = parser.push(&input);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn zero_length_is_rejected_then_recovers() {
        let mut input = vec![START_DELIMITER, 0x00, 0x00];
        input.extend_from_slice(&encode_transmit_request(0, 0x42, b"ok"));
        // Outbound frames parse too; 0x10 is simply an unknown inbound type,
        // so use an rx packet to observe recovery.
        let mut input2 = vec![START_DELIMITER, 0x00, 0x00];
        input2.extend_from_slice(&encode(&rx_packet_body(0x42, b"ok")));
        let mut parser = FrameParser::new();
        assert!(parser.push(&input).is_empty());
        let frames = parser.push(&input2);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn checksum_mismatch_drops_frame_only() {
        let mut bad = encode(&rx_packet_body(0x42, b"aa"));
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let good = encode(&rx_packet_body(0x42, b"bb"));
        let mut parser = FrameParser::new();
        assert!(parser.push(&bad).is_empty());
        let frames = parser.push(&good);
        assert_eq!(frames.len(), 1);
    }
}
