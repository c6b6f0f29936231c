//! Receiving side of the fragment protocol: validate inbound fragments, fill
//! reassembly buffers, hand NACK/DONE traffic to the transmitter, and deliver
//! complete messages.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::codec;
use super::session::SessionManager;
use super::transmitter::FragmentTransmitter;
use super::{ReceivedMessage, RfOut, MAX_MESSAGE_LEN, MAX_NACK_ROUNDS, NACK_INTERVAL};
use crate::error::LinkError;
use crate::logutil::hex_snippet;
use crate::metrics;

pub struct FragmentReceiver {
    sessions: Arc<SessionManager>,
    transmitter: Arc<FragmentTransmitter>,
    outbound: mpsc::UnboundedSender<RfOut>,
    delivered: mpsc::UnboundedSender<ReceivedMessage>,
}

impl FragmentReceiver {
    pub fn new(
        sessions: Arc<SessionManager>,
        transmitter: Arc<FragmentTransmitter>,
        outbound: mpsc::UnboundedSender<RfOut>,
        delivered: mpsc::UnboundedSender<ReceivedMessage>,
    ) -> Self {
        FragmentReceiver {
            sessions,
            transmitter,
            outbound,
            delivered,
        }
    }

    /// Entry point for every inbound RF payload, dispatched on the type byte.
    pub async fn handle_rf(&self, data: &[u8], source: u64) {
        match codec::peek_type(data) {
            Some(codec::TYPE_DATA) => self.handle_data(data, source),
            Some(codec::TYPE_NACK) => match codec::parse_nack(data) {
                Ok((msg_id, missing)) => self.transmitter.handle_nack(msg_id, &missing).await,
                Err(err) => drop_invalid("nack", &err, data),
            },
            Some(codec::TYPE_DONE) => match codec::parse_done(data) {
                Ok(msg_id) => self.transmitter.handle_done(msg_id),
                Err(err) => drop_invalid("done", &err, data),
            },
            Some(other) => debug!(
                "ignoring rf payload with unknown type {:#04x} from {:#018x}",
                other, source
            ),
            None => debug!("ignoring truncated rf payload from {:#018x}", source),
        }
    }

    fn handle_data(&self, data: &[u8], source: u64) {
        let (header, payload) = match codec::parse_data(data) {
            Ok(parsed) => parsed,
            Err(LinkError::Crc) => {
                metrics::inc_crc_failures();
                debug!("data fragment from {:#018x} failed crc", source);
                return;
            }
            Err(err) => {
                debug!("dropping data fragment from {:#018x}: {}", source, err);
                return;
            }
        };
        metrics::inc_fragments_received();
        let msg_id = header.msg_id;

        match self.sessions.with_rx(msg_id, |s| (s.total_len, s.frag_count)) {
            Some((total_len, frag_count))
                if total_len != header.total_len || frag_count != header.frag_count =>
            {
                debug!(
                    "fragment for {:#06x} disagrees with the live session shape, dropped",
                    msg_id
                );
                return;
            }
            Some(_) => {}
            None => {
                if header.total_len as usize > MAX_MESSAGE_LEN {
                    debug!(
                        "fragment for {:#06x} declares an oversize message, dropped",
                        msg_id
                    );
                    return;
                }
                if header.frag_count == 0 || header.frag_index >= header.frag_count {
                    debug!("fragment for {:#06x} has inconsistent indices, dropped", msg_id);
                    return;
                }
                self.sessions
                    .create_rx(msg_id, header.total_len, header.frag_count, source);
                trace!(
                    "new receive session {:#06x}: {} fragments from {:#018x}",
                    msg_id,
                    header.frag_count,
                    source
                );
            }
        }

        let inserted = self
            .sessions
            .with_rx(msg_id, |s| s.insert(header.frag_index, payload))
            .unwrap_or(false);
        if !inserted {
            trace!(
                "duplicate fragment {} for {:#06x}, discarded",
                header.frag_index,
                msg_id
            );
        }

        if self.sessions.is_complete(msg_id) {
            self.finish(msg_id);
        } else if header.frag_index + 1 == header.frag_count {
            // The declared last fragment arrived but holes remain: ask now
            // rather than waiting for the inactivity sweep.
            self.prompt_nack(msg_id);
        }
    }

    /// Reassemble, deliver, acknowledge with DONE, and drop the session.
    fn finish(&self, msg_id: u16) {
        let source = match self.sessions.with_rx(msg_id, |s| s.source) {
            Some(source) => source,
            None => return,
        };
        match self.sessions.reassemble(msg_id) {
            Ok(data) => {
                self.sessions.remove_rx(msg_id);
                debug!(
                    "message {:#06x} complete: {} bytes from {:#018x}",
                    msg_id,
                    data.len(),
                    source
                );
                metrics::inc_messages_completed();
                let _ = self.outbound.send(RfOut {
                    dest: source,
                    payload: codec::encode_done(msg_id),
                });
                let _ = self.delivered.send(ReceivedMessage { data, source });
            }
            Err(err) => {
                // Stay silent; the remote will observe our timeout.
                warn!("reassembly of {:#06x} failed: {}", msg_id, err);
                metrics::inc_messages_failed();
                self.sessions.remove_rx(msg_id);
            }
        }
    }

    /// Emit a NACK naming every missing fragment of `msg_id`, subject to the
    /// per-session rate limit and the round cap. Called on last-fragment
    /// arrival and on inactivity sweeps.
    pub fn prompt_nack(&self, msg_id: u16) {
        enum Action {
            Skip,
            Exhausted,
            Send { dest: u64, missing: Vec<u16> },
        }

        let action = self.sessions.with_rx(msg_id, |s| {
            if s.is_complete() {
                return Action::Skip;
            }
            if s.nacks_sent >= MAX_NACK_ROUNDS {
                return Action::Exhausted;
            }
            if let Some(last) = s.last_nack {
                if last.elapsed() < NACK_INTERVAL {
                    return Action::Skip;
                }
            }
            let mut missing = s.missing_indices();
            missing.truncate(codec::MAX_NACK_INDICES);
            s.nacks_sent += 1;
            s.last_nack = Some(Instant::now());
            Action::Send {
                dest: s.source,
                missing,
            }
        });

        match action {
            None | Some(Action::Skip) => {}
            Some(Action::Exhausted) => {
                warn!(
                    "receive session {:#06x} exhausted {} nack rounds, dropping",
                    msg_id, MAX_NACK_ROUNDS
                );
                metrics::inc_messages_failed();
                self.sessions.remove_rx(msg_id);
            }
            Some(Action::Send { dest, missing }) => {
                debug!(
                    "nack {:#06x}: requesting {} missing fragments",
                    msg_id,
                    missing.len()
                );
                let _ = self.outbound.send(RfOut {
                    dest,
                    payload: codec::encode_nack(msg_id, &missing),
                });
                metrics::inc_nacks_sent();
            }
        }
    }
}

fn drop_invalid(kind: &str, err: &LinkError, data: &[u8]) {
    if matches!(err, LinkError::Crc) {
        metrics::inc_crc_failures();
    }
    debug!("dropping invalid {}: {} ({})", kind, err, hex_snippet(data, 16));
}
