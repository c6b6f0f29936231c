//! Loopback harness: two real [`MeshLink`] facades joined by in-memory
//! channels with fault injection standing in for the radio link.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use xbmesh::config::ProtocolConfig;
use xbmesh::link::MeshLink;
use xbmesh::protocol::{ReceivedMessage, RfOut};
use xbmesh::xbee::RfEvent;

/// Per-direction link behavior: each outbound payload maps to zero or more
/// payloads actually delivered (drop, pass, corrupt, duplicate).
pub type Fault = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

pub fn lossless() -> Fault {
    Box::new(|payload| vec![payload.to_vec()])
}

/// One end of the loopback link: the shipped facade over channel transport.
pub struct Station {
    pub addr: u64,
    pub link: Arc<MeshLink>,
    pub delivered: mpsc::UnboundedReceiver<ReceivedMessage>,
    wire: Option<mpsc::UnboundedReceiver<RfOut>>,
    rf_tx: mpsc::UnboundedSender<RfEvent>,
}

/// Build a station around `MeshLink::over_channels`. Must be called inside a
/// tokio runtime.
pub fn station(addr: u64, fragment_payload: usize) -> Station {
    let (wire_tx, wire_rx) = mpsc::unbounded_channel();
    let (rf_tx, rf_rx) = mpsc::unbounded_channel();
    let protocol = ProtocolConfig { fragment_payload };
    let link = Arc::new(MeshLink::over_channels(wire_tx, rf_rx, &protocol));
    let delivered = link
        .take_messages()
        .expect("a fresh link still holds its message stream");
    Station {
        addr,
        link,
        delivered,
        wire: Some(wire_rx),
        rf_tx,
    }
}

/// Join two stations with per-direction faults. Every payload a station
/// emits is run through the fault and the survivors are handed to the peer.
pub fn join(a: &mut Station, b: &mut Station, mut a_to_b: Fault, mut b_to_a: Fault) {
    let mut a_wire = a.wire.take().expect("station already joined");
    let mut b_wire = b.wire.take().expect("station already joined");
    let (a_addr, b_addr) = (a.addr, b.addr);

    let to_b = b.rf_tx.clone();
    tokio::spawn(async move {
        while let Some(RfOut { payload, .. }) = a_wire.recv().await {
            for delivered in a_to_b(&payload) {
                let _ = to_b.send(RfEvent {
                    data: delivered,
                    source: a_addr,
                });
            }
        }
    });

    let to_a = a.rf_tx.clone();
    tokio::spawn(async move {
        while let Some(RfOut { payload, .. }) = b_wire.recv().await {
            for delivered in b_to_a(&payload) {
                let _ = to_a.send(RfEvent {
                    data: delivered,
                    source: b_addr,
                });
            }
        }
    });
}

/// Fragment index of a DATA payload, if that is what this is.
pub fn data_frag_index(payload: &[u8]) -> Option<u16> {
    if payload.len() >= 15 && payload.get(1) == Some(&0x01) {
        Some(u16::from_be_bytes([payload[8], payload[9]]))
    } else {
        None
    }
}

/// Message id of a DATA payload, if that is what this is.
pub fn data_msg_id(payload: &[u8]) -> Option<u16> {
    if payload.len() >= 15 && payload.get(1) == Some(&0x01) {
        Some(u16::from_be_bytes([payload[2], payload[3]]))
    } else {
        None
    }
}

pub fn is_nack(payload: &[u8]) -> bool {
    payload.get(1) == Some(&0x02)
}

pub fn is_done(payload: &[u8]) -> bool {
    payload.get(1) == Some(&0x03)
}

/// Wait for the next delivered message, failing loudly on silence.
pub async fn expect_message(rx: &mut mpsc::UnboundedReceiver<ReceivedMessage>) -> ReceivedMessage {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for a delivered message")
        .expect("delivery stream closed")
}
