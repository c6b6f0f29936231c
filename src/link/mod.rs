//! Application-facing facade combining the radio device with the fragment
//! protocol stack.
//!
//! A [`MeshLink`] owns the [`XBeeDevice`](crate::xbee::XBeeDevice), the
//! session manager, and the fragment transmitter/receiver pair, plus the
//! pump tasks that move traffic between them:
//!
//! ```text
//! send_message -> transmitter -> outbound pump -> device -> serial port
//! serial port -> device -> inbound pump -> receiver -> take_messages()
//! ```
//!
//! The facade is the single subscriber of every internal channel; the
//! application sees only `send_message`, the inbound message stream, and the
//! statistics counters.
//!
//! [`MeshLink::over_channels`] runs the same stack over caller-supplied
//! channels in place of the radio. The loopback tests and virtual-device
//! setups drive the facade through it without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ProtocolConfig;
use crate::error::LinkError;
use crate::metrics::{self, Snapshot};
use crate::protocol::receiver::FragmentReceiver;
use crate::protocol::session::{SessionEvent, SessionManager};
use crate::protocol::transmitter::FragmentTransmitter;
use crate::protocol::{ReceivedMessage, RfOut};
use crate::xbee::RfEvent;
#[cfg(feature = "serial")]
use crate::xbee::XBeeDevice;

pub struct MeshLink {
    #[cfg(feature = "serial")]
    device: Option<Arc<XBeeDevice>>,
    sessions: Arc<SessionManager>,
    transmitter: Arc<FragmentTransmitter>,
    messages: Mutex<Option<mpsc::UnboundedReceiver<ReceivedMessage>>>,
    shutdown: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connected: AtomicBool,
}

impl MeshLink {
    /// Acquire the port, read the radio's own address, and start the
    /// protocol stack.
    #[cfg(feature = "serial")]
    pub async fn connect(
        port: &str,
        baud: u32,
        protocol: &ProtocolConfig,
    ) -> Result<Self, LinkError> {
        let (device, rf_rx) = XBeeDevice::connect(port, baud).await?;
        let device = Arc::new(device);
        let sink_device = Arc::clone(&device);
        let mut link = Self::assemble(rf_rx, protocol, move |out: RfOut| {
            sink_device.send(out.dest, &out.payload)
        });
        link.device = Some(device);
        Ok(link)
    }

    /// Run the full protocol stack over caller-supplied channels instead of
    /// a radio: outbound RF payloads appear on `wire_tx`, inbound ones are
    /// fed through the paired sender of `rf_rx`. Everything else behaves
    /// exactly as after [`connect`](Self::connect); the local address is
    /// zero.
    pub fn over_channels(
        wire_tx: mpsc::UnboundedSender<RfOut>,
        rf_rx: mpsc::UnboundedReceiver<RfEvent>,
        protocol: &ProtocolConfig,
    ) -> Self {
        Self::assemble(rf_rx, protocol, move |out: RfOut| {
            wire_tx
                .send(out)
                .map_err(|_| LinkError::Transport("wire channel closed".into()))
        })
    }

    /// Wire sessions, transmitter, receiver, the pumps, and housekeeping
    /// around a wire sink.
    fn assemble<S>(
        mut rf_rx: mpsc::UnboundedReceiver<RfEvent>,
        protocol: &ProtocolConfig,
        sink: S,
    ) -> Self
    where
        S: Fn(RfOut) -> Result<(), LinkError> + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<RfOut>();
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

        let sessions = Arc::new(SessionManager::new());
        let transmitter = Arc::new(FragmentTransmitter::with_payload_len(
            Arc::clone(&sessions),
            outbound_tx.clone(),
            protocol.fragment_payload,
        ));
        let receiver = Arc::new(FragmentReceiver::new(
            Arc::clone(&sessions),
            Arc::clone(&transmitter),
            outbound_tx,
            delivered_tx,
        ));

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();

        // Outbound pump: protocol traffic onto the wire.
        tasks.push(tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                if let Err(e) = sink(out) {
                    warn!("dropping outbound rf payload: {}", e);
                }
            }
        }));

        // Inbound pump: wire payloads into the fragment receiver.
        {
            let receiver = Arc::clone(&receiver);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rf_rx.recv().await {
                    receiver.handle_rf(&event.data, event.source).await;
                }
            }));
        }

        // Session housekeeping and its subscriber.
        tasks.push(sessions.spawn_housekeeping(event_tx, Arc::clone(&shutdown)));
        {
            let receiver = Arc::clone(&receiver);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        SessionEvent::RxInactive { msg_id } => receiver.prompt_nack(msg_id),
                        SessionEvent::RxExpired { msg_id } => {
                            debug!("gave up on receive session {:#06x}", msg_id)
                        }
                    }
                }
            }));
        }

        MeshLink {
            #[cfg(feature = "serial")]
            device: None,
            sessions,
            transmitter,
            messages: Mutex::new(Some(delivered_rx)),
            shutdown,
            tasks: Mutex::new(tasks),
            connected: AtomicBool::new(true),
        }
    }

    /// The radio's 64-bit hardware address; zero if it could not be read or
    /// no radio backs this link.
    pub fn local_address(&self) -> u64 {
        #[cfg(feature = "serial")]
        if let Some(device) = &self.device {
            return device.local_address();
        }
        0
    }

    /// Transmit `data` to `dest` and wait for the outcome. `Ok(true)` means
    /// the remote confirmed full delivery; `Ok(false)` covers timeout and
    /// retransmission exhaustion.
    pub async fn send_message(&self, data: &[u8], dest: u64) -> Result<bool, LinkError> {
        self.send(data, dest, None).await
    }

    /// Like [`send_message`](Self::send_message), aborted with `Ok(false)`
    /// when `cancel` fires. Fragments already queued on the wire are not
    /// revoked.
    pub async fn send_message_cancellable(
        &self,
        data: &[u8],
        dest: u64,
        cancel: oneshot::Receiver<()>,
    ) -> Result<bool, LinkError> {
        self.send(data, dest, Some(cancel)).await
    }

    async fn send(
        &self,
        data: &[u8],
        dest: u64,
        cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<bool, LinkError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(LinkError::Disconnected);
        }
        self.transmitter.send_message(data, dest, cancel).await
    }

    /// Take the inbound message stream. The facade is the single subscriber,
    /// so only the first call yields the receiver.
    pub fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<ReceivedMessage>> {
        self.messages
            .lock()
            .expect("message stream slot poisoned")
            .take()
    }

    pub fn stats(&self) -> Snapshot {
        metrics::snapshot()
    }

    /// Live (transmit, receive) session counts, for diagnostics.
    pub fn live_sessions(&self) -> (usize, usize) {
        (self.sessions.tx_count(), self.sessions.rx_count())
    }

    /// Idempotent teardown: close the port, fail every pending future and
    /// in-flight send, stop the pumps.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        #[cfg(feature = "serial")]
        if let Some(device) = &self.device {
            device.close().await;
        }
        self.sessions.fail_all();
        for task in self.tasks.lock().expect("task list poisoned").drain(..) {
            task.abort();
        }
        debug!("link disconnected");
    }
}
