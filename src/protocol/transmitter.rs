//! Sending side of the fragment protocol: split, pace, retransmit on NACK,
//! resolve on DONE or give up.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use super::codec::{self, FragmentHeader};
use super::session::SessionManager;
use super::{RfOut, DEFAULT_FRAGMENT_PAYLOAD, MAX_FRAGMENT_PAYLOAD, MAX_MESSAGE_LEN, MAX_NACK_ROUNDS};
use crate::error::LinkError;
use crate::metrics;

/// Pause inserted after every fifth NACK-driven retransmit.
const RETRANSMIT_PAUSE: Duration = Duration::from_millis(20);

pub struct FragmentTransmitter {
    sessions: Arc<SessionManager>,
    outbound: mpsc::UnboundedSender<RfOut>,
    payload_len: usize,
}

impl FragmentTransmitter {
    pub fn new(sessions: Arc<SessionManager>, outbound: mpsc::UnboundedSender<RfOut>) -> Self {
        Self::with_payload_len(sessions, outbound, DEFAULT_FRAGMENT_PAYLOAD)
    }

    /// `payload_len` is clamped to 1..=34; larger slices would not fit a
    /// one-hop RF frame once encryption headroom is accounted for.
    pub fn with_payload_len(
        sessions: Arc<SessionManager>,
        outbound: mpsc::UnboundedSender<RfOut>,
        payload_len: usize,
    ) -> Self {
        FragmentTransmitter {
            sessions,
            outbound,
            payload_len: payload_len.clamp(1, MAX_FRAGMENT_PAYLOAD),
        }
    }

    /// Transmit `data` to `dest` and wait for the outcome: `Ok(true)` when
    /// the remote confirmed full delivery with DONE, `Ok(false)` on timeout,
    /// NACK-round exhaustion, or cancellation. An empty message is legal and
    /// travels as one zero-length fragment.
    pub async fn send_message(
        &self,
        data: &[u8],
        dest: u64,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<bool, LinkError> {
        if data.len() > MAX_MESSAGE_LEN {
            return Err(LinkError::Session("message larger than the 10 KiB bound"));
        }
        let msg_id = self.sessions.allocate_msg_id();
        let fragments = self.encode_fragments(msg_id, data);
        let done_rx = self
            .sessions
            .create_tx(msg_id, dest, data.to_vec(), fragments.clone());
        debug!(
            "send {:#06x}: {} bytes as {} fragments to {:#018x}",
            msg_id,
            data.len(),
            fragments.len(),
            dest
        );
        match cancel {
            Some(cancel) => {
                tokio::select! {
                    result = self.transmit_and_wait(msg_id, dest, fragments, done_rx) => result,
                    _ = cancel => {
                        debug!("send {:#06x} cancelled by caller", msg_id);
                        self.sessions.remove_tx(msg_id);
                        metrics::inc_messages_failed();
                        Ok(false)
                    }
                }
            }
            None => self.transmit_and_wait(msg_id, dest, fragments, done_rx).await,
        }
    }

    fn encode_fragments(&self, msg_id: u16, data: &[u8]) -> Vec<Vec<u8>> {
        let count = fragment_count(data.len(), self.payload_len);
        let mut fragments = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * self.payload_len;
            let end = cmp::min(start + self.payload_len, data.len());
            let payload = &data[start..end];
            let header = FragmentHeader {
                msg_id,
                total_len: data.len() as u32,
                frag_index: index as u16,
                frag_count: count as u16,
                payload_len: payload.len() as u8,
            };
            fragments.push(codec::encode_data(&header, payload));
        }
        fragments
    }

    async fn transmit_and_wait(
        &self,
        msg_id: u16,
        dest: u64,
        fragments: Vec<Vec<u8>>,
        done_rx: oneshot::Receiver<bool>,
    ) -> Result<bool, LinkError> {
        let gap = initial_gap(fragments.len());
        let last = fragments.len() - 1;
        for (index, frame) in fragments.into_iter().enumerate() {
            if self.outbound.send(RfOut { dest, payload: frame }).is_err() {
                self.sessions.remove_tx(msg_id);
                return Err(LinkError::Transport("radio link closed".into()));
            }
            metrics::inc_fragments_sent();
            if index != last {
                sleep(gap).await;
            }
        }
        // Resolved by DONE, by NACK-round exhaustion, or by the housekeeping
        // session timeout. A dropped sender means the manager was torn down.
        Ok(done_rx.await.unwrap_or(false))
    }

    /// React to a NACK for one of our sends: bump the round counter, give up
    /// past the cap, otherwise retransmit exactly the listed fragments.
    pub async fn handle_nack(&self, msg_id: u16, missing: &[u16]) {
        let lookup = self.sessions.with_tx(msg_id, |s| {
            s.nack_rounds += 1;
            if s.nack_rounds > MAX_NACK_ROUNDS {
                None
            } else {
                let frames: Vec<(u16, Vec<u8>)> = missing
                    .iter()
                    .filter_map(|&i| s.fragments.get(i as usize).map(|f| (i, f.clone())))
                    .collect();
                Some((s.dest, frames))
            }
        });
        match lookup {
            None => debug!("nack for unknown send {:#06x}", msg_id),
            Some(None) => {
                warn!(
                    "send {:#06x} exceeded {} nack rounds, giving up",
                    msg_id, MAX_NACK_ROUNDS
                );
                metrics::inc_messages_failed();
                self.sessions.complete_tx(msg_id, false);
            }
            Some(Some((dest, frames))) => {
                for (n, (index, frame)) in frames.into_iter().enumerate() {
                    trace!("retransmit fragment {} of {:#06x}", index, msg_id);
                    if self.outbound.send(RfOut { dest, payload: frame }).is_err() {
                        self.sessions.complete_tx(msg_id, false);
                        return;
                    }
                    metrics::inc_fragments_retransmitted();
                    if (n + 1) % 5 == 0 {
                        sleep(RETRANSMIT_PAUSE).await;
                    }
                }
            }
        }
    }

    /// The remote confirmed full delivery.
    pub fn handle_done(&self, msg_id: u16) {
        if self.sessions.complete_tx(msg_id, true) {
            debug!("send {:#06x} acknowledged", msg_id);
        } else {
            debug!("done for unknown send {:#06x}", msg_id);
        }
    }
}

/// Fragments needed for `len` payload bytes; an empty message still takes one.
pub fn fragment_count(len: usize, payload_len: usize) -> usize {
    cmp::max(1, (len + payload_len - 1) / payload_len)
}

/// Inter-fragment spacing for the initial transmission. Keeps a burst from
/// overflowing the radio's internal transmit buffer; a heuristic, not a
/// contract.
fn initial_gap(count: usize) -> Duration {
    let ms = match count {
        0..=10 => 10,
        11..=30 => 15,
        31..=50 => 20,
        _ => 30,
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::fragment_count;

    #[test]
    fn fragment_counts() {
        assert_eq!(fragment_count(0, 30), 1);
        assert_eq!(fragment_count(1, 30), 1);
        assert_eq!(fragment_count(30, 30), 1);
        assert_eq!(fragment_count(31, 30), 2);
        assert_eq!(fragment_count(95, 30), 4);
        assert_eq!(fragment_count(10_240, 30), 342);
    }
}
