//! Session bookkeeping for both directions of the fragment protocol.
//!
//! A [`SessionManager`] owns two keyed maps: live transmit sessions (messages
//! we are sending and still awaiting DONE for) and live receive sessions
//! (messages we are reassembling). A 500 ms housekeeping sweep expires
//! sessions that outlived their bounds and prompts NACKs for receive sessions
//! that stopped seeing fragments.
//!
//! Lock discipline: each map sits behind its own mutex, and the sweep never
//! holds either lock while notifying subscribers; it snapshots the keys,
//! classifies each session, and sends events afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::{FRAGMENT_TIMEOUT, HOUSEKEEPING_PERIOD, SESSION_TIMEOUT};
use crate::error::LinkError;
use crate::metrics;

/// Sender-side state for one in-flight message.
pub struct TxSession {
    pub msg_id: u16,
    pub dest: u64,
    /// The original message, kept until completion so diagnostics can refer
    /// to it; released together with the fragments the moment the session
    /// resolves.
    pub payload: Vec<u8>,
    /// Pre-encoded wire fragments, indexed by fragment number.
    pub fragments: Vec<Vec<u8>>,
    pub started: Instant,
    pub nack_rounds: u32,
    done: Option<oneshot::Sender<bool>>,
}

/// Receiver-side state for one message under reassembly.
pub struct RxSession {
    pub msg_id: u16,
    pub total_len: u32,
    pub frag_count: u16,
    pub source: u64,
    /// Payload slot per fragment index.
    slots: Vec<Option<Vec<u8>>>,
    /// Bitmap paralleling `slots`; a set entry means the slot was filled.
    received: Vec<bool>,
    pub started: Instant,
    pub last_activity: Instant,
    pub nacks_sent: u32,
    pub last_nack: Option<Instant>,
}

impl RxSession {
    fn new(msg_id: u16, total_len: u32, frag_count: u16, source: u64) -> Self {
        let now = Instant::now();
        RxSession {
            msg_id,
            total_len,
            frag_count,
            source,
            slots: vec![None; frag_count as usize],
            received: vec![false; frag_count as usize],
            started: now,
            last_activity: now,
            nacks_sent: 0,
            last_nack: None,
        }
    }

    /// Store a fragment payload. Returns true when the slot was empty and the
    /// index in range; duplicates and out-of-range indices change nothing.
    pub fn insert(&mut self, index: u16, payload: &[u8]) -> bool {
        let idx = index as usize;
        if idx >= self.slots.len() || self.received[idx] {
            return false;
        }
        self.slots[idx] = Some(payload.to_vec());
        self.received[idx] = true;
        self.last_activity = Instant::now();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }

    /// Sorted list of still-empty fragment indices.
    pub fn missing_indices(&self) -> Vec<u16> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, &r)| !r)
            .map(|(i, _)| i as u16)
            .collect()
    }
}

/// Notifications emitted by the housekeeping sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A receive session stopped seeing fragments before completing; the
    /// subscriber should prompt a NACK.
    RxInactive { msg_id: u16 },
    /// A receive session exceeded its total lifetime and was dropped.
    RxExpired { msg_id: u16 },
}

/// Keyed stores for live sessions plus the message-id allocator.
pub struct SessionManager {
    tx: Mutex<HashMap<u16, TxSession>>,
    rx: Mutex<HashMap<u16, RxSession>>,
    next_msg_id: Mutex<u16>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            tx: Mutex::new(HashMap::new()),
            rx: Mutex::new(HashMap::new()),
            // Random starting point so ids rarely collide across restarts.
            next_msg_id: Mutex::new(rand::random::<u16>().max(1)),
        }
    }

    /// Next message id: monotonically increasing, wrapping at 2^16, skipping
    /// zero and any id still held by a live transmit session.
    pub fn allocate_msg_id(&self) -> u16 {
        let mut next = self.next_msg_id.lock().expect("msg id counter poisoned");
        let tx = self.tx.lock().expect("tx session map poisoned");
        loop {
            let id = *next;
            *next = next.wrapping_add(1);
            if *next == 0 {
                *next = 1;
            }
            if id != 0 && !tx.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a transmit session; the returned receiver resolves `true` on
    /// DONE and `false` on any failure.
    pub fn create_tx(
        &self,
        msg_id: u16,
        dest: u64,
        payload: Vec<u8>,
        fragments: Vec<Vec<u8>>,
    ) -> oneshot::Receiver<bool> {
        let (done_tx, done_rx) = oneshot::channel();
        let session = TxSession {
            msg_id,
            dest,
            payload,
            fragments,
            started: Instant::now(),
            nack_rounds: 0,
            done: Some(done_tx),
        };
        self.tx
            .lock()
            .expect("tx session map poisoned")
            .insert(msg_id, session);
        done_rx
    }

    pub fn with_tx<R>(&self, msg_id: u16, f: impl FnOnce(&mut TxSession) -> R) -> Option<R> {
        self.tx
            .lock()
            .expect("tx session map poisoned")
            .get_mut(&msg_id)
            .map(f)
    }

    pub fn remove_tx(&self, msg_id: u16) -> Option<TxSession> {
        self.tx
            .lock()
            .expect("tx session map poisoned")
            .remove(&msg_id)
    }

    /// Remove the transmit session and resolve its completion signal.
    /// Returns false when no such session was live.
    pub fn complete_tx(&self, msg_id: u16, success: bool) -> bool {
        match self.remove_tx(msg_id) {
            Some(mut session) => {
                if let Some(done) = session.done.take() {
                    let _ = done.send(success);
                }
                true
            }
            None => false,
        }
    }

    pub fn tx_ids(&self) -> Vec<u16> {
        self.tx
            .lock()
            .expect("tx session map poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn tx_count(&self) -> usize {
        self.tx.lock().expect("tx session map poisoned").len()
    }

    pub fn create_rx(&self, msg_id: u16, total_len: u32, frag_count: u16, source: u64) {
        self.rx
            .lock()
            .expect("rx session map poisoned")
            .insert(msg_id, RxSession::new(msg_id, total_len, frag_count, source));
    }

    pub fn with_rx<R>(&self, msg_id: u16, f: impl FnOnce(&mut RxSession) -> R) -> Option<R> {
        self.rx
            .lock()
            .expect("rx session map poisoned")
            .get_mut(&msg_id)
            .map(f)
    }

    pub fn remove_rx(&self, msg_id: u16) -> Option<RxSession> {
        self.rx
            .lock()
            .expect("rx session map poisoned")
            .remove(&msg_id)
    }

    pub fn rx_ids(&self) -> Vec<u16> {
        self.rx
            .lock()
            .expect("rx session map poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn rx_count(&self) -> usize {
        self.rx.lock().expect("rx session map poisoned").len()
    }

    /// Sorted still-missing fragment indices of a receive session.
    pub fn missing_indices(&self, msg_id: u16) -> Option<Vec<u16>> {
        self.with_rx(msg_id, |s| s.missing_indices())
    }

    pub fn is_complete(&self, msg_id: u16) -> bool {
        self.with_rx(msg_id, |s| s.is_complete()).unwrap_or(false)
    }

    /// Concatenate all received slots in index order, verifying the result
    /// against the declared total length. The session stays in the map.
    pub fn reassemble(&self, msg_id: u16) -> Result<Vec<u8>, LinkError> {
        self.with_rx(msg_id, |s| {
            if !s.is_complete() {
                return Err(LinkError::Session("reassembly before completion"));
            }
            let mut out = Vec::with_capacity(s.total_len as usize);
            for slot in &s.slots {
                if let Some(payload) = slot {
                    out.extend_from_slice(payload);
                }
            }
            if out.len() != s.total_len as usize {
                return Err(LinkError::Session("reassembled length disagrees with header"));
            }
            Ok(out)
        })
        .unwrap_or(Err(LinkError::Session("no such receive session")))
    }

    /// Tear down everything: resolve every transmit session with failure and
    /// drop all receive state. Used on disconnect.
    pub fn fail_all(&self) {
        let drained: Vec<TxSession> = {
            let mut tx = self.tx.lock().expect("tx session map poisoned");
            tx.drain().map(|(_, s)| s).collect()
        };
        for mut session in drained {
            metrics::inc_messages_failed();
            if let Some(done) = session.done.take() {
                let _ = done.send(false);
            }
        }
        self.rx.lock().expect("rx session map poisoned").clear();
    }

    /// Spawn the periodic housekeeping sweep. Subscriber errors are ignored
    /// so one bad tick cannot stop the timer.
    pub fn spawn_housekeeping(
        self: &Arc<Self>,
        events: mpsc::UnboundedSender<SessionEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(HOUSEKEEPING_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                sessions.sweep(&events);
            }
            debug!("session housekeeping stopped");
        })
    }

    fn sweep(&self, events: &mpsc::UnboundedSender<SessionEvent>) {
        let now = Instant::now();

        enum RxVerdict {
            Healthy,
            Inactive,
            Expired,
        }

        let mut notify = Vec::new();
        for msg_id in self.rx_ids() {
            let verdict = self.with_rx(msg_id, |s| {
                if now.duration_since(s.started) >= SESSION_TIMEOUT {
                    RxVerdict::Expired
                } else if !s.is_complete()
                    && now.duration_since(s.last_activity) >= FRAGMENT_TIMEOUT
                {
                    RxVerdict::Inactive
                } else {
                    RxVerdict::Healthy
                }
            });
            match verdict {
                Some(RxVerdict::Expired) => {
                    warn!("receive session {:#06x} timed out, dropping", msg_id);
                    self.remove_rx(msg_id);
                    metrics::inc_messages_failed();
                    notify.push(SessionEvent::RxExpired { msg_id });
                }
                Some(RxVerdict::Inactive) => notify.push(SessionEvent::RxInactive { msg_id }),
                _ => {}
            }
        }
        for event in notify {
            let _ = events.send(event);
        }

        for msg_id in self.tx_ids() {
            let expired = self
                .with_tx(msg_id, |s| now.duration_since(s.started) >= SESSION_TIMEOUT)
                .unwrap_or(false);
            if expired {
                warn!("send {:#06x} hit the session timeout", msg_id);
                metrics::inc_messages_failed();
                self.complete_tx(msg_id, false);
            }
        }
    }
}
