//! Session bookkeeping invariants: id allocation, idempotent slot filling,
//! reassembly checks, and housekeeping timeouts.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use xbmesh::protocol::session::{SessionEvent, SessionManager};
use xbmesh::LinkError;

const SRC: u64 = 0x0013_A200_4000_0042;

#[test]
fn allocated_ids_are_never_zero() {
    let sessions = SessionManager::new();
    for _ in 0..70_000 {
        assert_ne!(sessions.allocate_msg_id(), 0);
    }
}

#[test]
fn live_transmit_sessions_keep_their_ids_reserved() {
    let sessions = SessionManager::new();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..100 {
        let msg_id = sessions.allocate_msg_id();
        let _done = sessions.create_tx(msg_id, SRC, vec![], vec![]);
        assert!(ids.insert(msg_id), "id {} allocated twice", msg_id);
    }
    assert_eq!(sessions.tx_count(), 100);
}

#[test]
fn fragment_slots_are_idempotent() {
    let sessions = SessionManager::new();
    sessions.create_rx(9, 6, 2, SRC);

    assert_eq!(sessions.with_rx(9, |s| s.insert(0, b"abc")), Some(true));
    // Duplicate and out-of-range inserts change nothing.
    assert_eq!(sessions.with_rx(9, |s| s.insert(0, b"xyz")), Some(false));
    assert_eq!(sessions.with_rx(9, |s| s.insert(2, b"zzz")), Some(false));
    assert_eq!(sessions.missing_indices(9), Some(vec![1]));
    assert!(!sessions.is_complete(9));

    assert_eq!(sessions.with_rx(9, |s| s.insert(1, b"def")), Some(true));
    assert!(sessions.is_complete(9));
    assert_eq!(sessions.reassemble(9).unwrap(), b"abcdef");
}

#[test]
fn missing_indices_come_back_sorted() {
    let sessions = SessionManager::new();
    sessions.create_rx(3, 25, 5, SRC);
    let _ = sessions.with_rx(3, |s| s.insert(3, b"ddddd"));
    let _ = sessions.with_rx(3, |s| s.insert(1, b"bbbbb"));
    assert_eq!(sessions.missing_indices(3), Some(vec![0, 2, 4]));
}

#[test]
fn reassembly_enforces_the_declared_total_length() {
    let sessions = SessionManager::new();
    // Declared 10 bytes, but the slots only hold 6.
    sessions.create_rx(4, 10, 2, SRC);
    let _ = sessions.with_rx(4, |s| s.insert(0, b"abc"));
    let _ = sessions.with_rx(4, |s| s.insert(1, b"def"));
    assert!(sessions.is_complete(4));
    assert!(matches!(
        sessions.reassemble(4),
        Err(LinkError::Session(_))
    ));
}

#[test]
fn empty_message_reassembles_to_nothing() {
    let sessions = SessionManager::new();
    sessions.create_rx(5, 0, 1, SRC);
    assert_eq!(sessions.with_rx(5, |s| s.insert(0, b"")), Some(true));
    assert!(sessions.is_complete(5));
    assert_eq!(sessions.reassemble(5).unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn complete_tx_resolves_the_waiter() {
    let sessions = SessionManager::new();
    let msg_id = sessions.allocate_msg_id();
    let done = sessions.create_tx(msg_id, SRC, b"payload".to_vec(), vec![vec![1, 2]]);
    assert!(sessions.complete_tx(msg_id, true));
    assert!(done.await.unwrap());
    assert_eq!(sessions.tx_count(), 0);
    // A second completion finds nothing.
    assert!(!sessions.complete_tx(msg_id, true));
}

#[tokio::test]
async fn fail_all_resolves_every_send_with_failure() {
    let sessions = SessionManager::new();
    let first = sessions.allocate_msg_id();
    let second = sessions.allocate_msg_id();
    let done_first = sessions.create_tx(first, SRC, vec![], vec![]);
    let done_second = sessions.create_tx(second, SRC, vec![], vec![]);
    sessions.create_rx(77, 5, 1, SRC);

    sessions.fail_all();
    assert!(!done_first.await.unwrap());
    assert!(!done_second.await.unwrap());
    assert_eq!(sessions.tx_count(), 0);
    assert_eq!(sessions.rx_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn housekeeping_prompts_inactive_receives_then_expires_them() {
    let sessions = Arc::new(SessionManager::new());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    sessions.spawn_housekeeping(event_tx, Arc::new(AtomicBool::new(false)));

    sessions.create_rx(21, 60, 2, SRC);
    let _ = sessions.with_rx(21, |s| s.insert(0, b"000000000000000000000000000000"));

    // First sweeps: inactivity prompts while the session is young.
    let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("no housekeeping event")
        .expect("event channel closed");
    assert_eq!(event, SessionEvent::RxInactive { msg_id: 21 });

    // Past the session bound the sweep drops it for good.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(35);
    loop {
        let event = tokio::time::timeout_at(deadline, event_rx.recv())
            .await
            .expect("expiry never came")
            .expect("event channel closed");
        if event == (SessionEvent::RxExpired { msg_id: 21 }) {
            break;
        }
    }
    assert_eq!(sessions.rx_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn housekeeping_times_out_stale_sends() {
    let sessions = Arc::new(SessionManager::new());
    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    sessions.spawn_housekeeping(event_tx, Arc::new(AtomicBool::new(false)));

    let msg_id = sessions.allocate_msg_id();
    let done = sessions.create_tx(msg_id, SRC, b"stuck".to_vec(), vec![vec![0]]);
    let outcome = tokio::time::timeout(Duration::from_secs(40), done)
        .await
        .expect("send never timed out");
    assert!(!outcome.unwrap());
    assert_eq!(sessions.tx_count(), 0);
}
