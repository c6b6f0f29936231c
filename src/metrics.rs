//! Link statistics: relaxed atomic counters, read back as an advisory snapshot.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAGMENTS_SENT: AtomicU64 = AtomicU64::new(0);
static FRAGMENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAGMENTS_RETRANSMITTED: AtomicU64 = AtomicU64::new(0);
static NACKS_SENT: AtomicU64 = AtomicU64::new(0);
static CRC_FAILURES: AtomicU64 = AtomicU64::new(0);
static MESSAGES_COMPLETED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_FAILED: AtomicU64 = AtomicU64::new(0);

pub fn inc_fragments_sent() {
    FRAGMENTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fragments_received() {
    FRAGMENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fragments_retransmitted() {
    FRAGMENTS_RETRANSMITTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_nacks_sent() {
    NACKS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_crc_failures() {
    CRC_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_completed() {
    MESSAGES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_failed() {
    MESSAGES_FAILED.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time view of all counters. Values are independently loaded, so a
/// snapshot taken while traffic is flowing may be internally skewed by a few
/// increments; reads are advisory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub fragments_retransmitted: u64,
    pub nacks_sent: u64,
    pub crc_failures: u64,
    pub messages_completed: u64,
    pub messages_failed: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        fragments_sent: FRAGMENTS_SENT.load(Ordering::Relaxed),
        fragments_received: FRAGMENTS_RECEIVED.load(Ordering::Relaxed),
        fragments_retransmitted: FRAGMENTS_RETRANSMITTED.load(Ordering::Relaxed),
        nacks_sent: NACKS_SENT.load(Ordering::Relaxed),
        crc_failures: CRC_FAILURES.load(Ordering::Relaxed),
        messages_completed: MESSAGES_COMPLETED.load(Ordering::Relaxed),
        messages_failed: MESSAGES_FAILED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let before = snapshot();
        inc_fragments_sent();
        inc_crc_failures();
        let after = snapshot();
        assert!(after.fragments_sent >= before.fragments_sent + 1);
        assert!(after.crc_failures >= before.crc_failures + 1);
    }
}
