//! XBee radio device: API Mode 2 framing wired to a serial port.
//!
//! [`XBeeDevice`] owns the port and a background reader that pumps bytes
//! through the stream parser. Inbound RF payloads (0x90, and 0x91 promoted to
//! the same shape) surface as [`RfEvent`]s; transmit-status and AT-response
//! frames complete one-shot futures matched by frame id. Outbound traffic
//! goes through [`XBeeDevice::send`] (fire and forget, frame id 0) or
//! [`XBeeDevice::send_with_status`] (frame id assigned, status awaited).

pub mod frame;
pub mod parser;
#[cfg(feature = "serial")]
pub mod serial;

use std::sync::Mutex;

/// One inbound RF payload with the sender's 64-bit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfEvent {
    pub data: Vec<u8>,
    pub source: u64,
}

/// Radio verdict on a transmit request that asked for status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    pub delivery_status: u8,
    pub retries: u8,
    pub discovery_status: u8,
}

impl TxStatus {
    pub fn delivered(&self) -> bool {
        self.delivery_status == 0
    }
}

/// Reply to a local AT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub command: [u8; 2],
    pub status: u8,
    pub data: Vec<u8>,
}

impl AtResponse {
    pub fn ok(&self) -> bool {
        self.status == 0
    }

    /// Interpret the response data as a big-endian integer, as the numeric
    /// registers (SH, SL, ...) report themselves.
    pub fn as_u64(&self) -> u64 {
        self.data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }
}

/// Frame ids wrap 1..=255; zero unambiguously means "no response expected".
struct FrameIdGen(Mutex<u8>);

impl FrameIdGen {
    fn new() -> Self {
        FrameIdGen(Mutex::new(0))
    }

    fn next(&self) -> u8 {
        let mut cur = self.0.lock().expect("frame id counter poisoned");
        *cur = cur.wrapping_add(1);
        if *cur == 0 {
            *cur = 1;
        }
        *cur
    }
}

#[cfg(feature = "serial")]
pub use device::XBeeDevice;

#[cfg(feature = "serial")]
mod device {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use log::{debug, error, info, warn};
    use serialport::SerialPort;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};

    use super::frame::{self, ApiFrame};
    use super::parser::FrameParser;
    use super::serial;
    use super::{AtResponse, FrameIdGen, RfEvent, TxStatus};
    use crate::error::LinkError;

    /// Settle time after opening the port before talking to the radio.
    const RADIO_SETTLE: Duration = Duration::from_millis(200);

    /// Bound on waiting for an AT response during setup.
    const AT_TIMEOUT: Duration = Duration::from_secs(1);

    type PendingStatus = Arc<Mutex<HashMap<u8, oneshot::Sender<TxStatus>>>>;
    type PendingAt = Arc<Mutex<HashMap<u8, oneshot::Sender<AtResponse>>>>;

    pub struct XBeeDevice {
        port: Arc<Mutex<Box<dyn SerialPort>>>,
        port_name: String,
        local_addr: AtomicU64,
        frame_ids: FrameIdGen,
        pending_status: PendingStatus,
        pending_at: PendingAt,
        shutdown: Arc<AtomicBool>,
        reader: Mutex<Option<JoinHandle<()>>>,
    }

    impl XBeeDevice {
        /// Open the port, start the reader, and read the radio's own 64-bit
        /// serial number. If SH/SL cannot be read the address stays zero and
        /// the device still works for plain sends.
        pub async fn connect(
            port_name: &str,
            baud: u32,
        ) -> Result<(Self, mpsc::UnboundedReceiver<RfEvent>), LinkError> {
            let mut port = serial::open_port(port_name, baud)?;
            sleep(RADIO_SETTLE).await;
            serial::purge(port.as_mut());

            let port = Arc::new(Mutex::new(port));
            let pending_status: PendingStatus = Arc::new(Mutex::new(HashMap::new()));
            let pending_at: PendingAt = Arc::new(Mutex::new(HashMap::new()));
            let shutdown = Arc::new(AtomicBool::new(false));
            let (rf_tx, rf_rx) = mpsc::unbounded_channel();

            let reader = spawn_reader(
                Arc::clone(&port),
                Arc::clone(&shutdown),
                rf_tx,
                Arc::clone(&pending_status),
                Arc::clone(&pending_at),
            );

            let device = XBeeDevice {
                port,
                port_name: port_name.to_string(),
                local_addr: AtomicU64::new(0),
                frame_ids: FrameIdGen::new(),
                pending_status,
                pending_at,
                shutdown,
                reader: Mutex::new(Some(reader)),
            };
            device.read_local_address().await;
            Ok((device, rf_rx))
        }

        async fn read_local_address(&self) {
            let sh = self.at_command(*b"SH", &[], AT_TIMEOUT).await;
            let sl = self.at_command(*b"SL", &[], AT_TIMEOUT).await;
            match (sh, sl) {
                (Ok(sh), Ok(sl)) if sh.ok() && sl.ok() => {
                    let addr = (sh.as_u64() << 32) | sl.as_u64();
                    self.local_addr.store(addr, Ordering::Relaxed);
                    info!("radio serial number {:#018x}", addr);
                }
                _ => warn!("could not read SH/SL, local address stays zero"),
            }
        }

        /// The radio's 64-bit hardware address, or zero if unknown.
        pub fn local_address(&self) -> u64 {
            self.local_addr.load(Ordering::Relaxed)
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }

        /// Fire-and-forget transmit: frame id zero, no status frame comes
        /// back.
        pub fn send(&self, dest: u64, data: &[u8]) -> Result<(), LinkError> {
            let wire = frame::encode_transmit_request(0, dest, data);
            self.write_wire(&wire)
        }

        /// Transmit with a frame id and wait for the matching status frame.
        pub async fn send_with_status(
            &self,
            dest: u64,
            data: &[u8],
            wait: Duration,
        ) -> Result<TxStatus, LinkError> {
            let frame_id = self.frame_ids.next();
            let (tx, rx) = oneshot::channel();
            self.pending_status
                .lock()
                .expect("pending status map poisoned")
                .insert(frame_id, tx);
            let wire = frame::encode_transmit_request(frame_id, dest, data);
            if let Err(e) = self.write_wire(&wire) {
                self.forget_status(frame_id);
                return Err(e);
            }
            match timeout(wait, rx).await {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(_)) => Err(LinkError::Disconnected),
                Err(_) => {
                    self.forget_status(frame_id);
                    Err(LinkError::Timeout("transmit status"))
                }
            }
        }

        /// Issue a local AT command and wait for its response.
        pub async fn at_command(
            &self,
            command: [u8; 2],
            parameter: &[u8],
            wait: Duration,
        ) -> Result<AtResponse, LinkError> {
            let frame_id = self.frame_ids.next();
            let (tx, rx) = oneshot::channel();
            self.pending_at
                .lock()
                .expect("pending at map poisoned")
                .insert(frame_id, tx);
            let wire = frame::encode_at_command(frame_id, command, parameter);
            if let Err(e) = self.write_wire(&wire) {
                self.forget_at(frame_id);
                return Err(e);
            }
            match timeout(wait, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(LinkError::Disconnected),
                Err(_) => {
                    self.forget_at(frame_id);
                    Err(LinkError::Timeout("at response"))
                }
            }
        }

        /// Stop the reader and fail every pending future. Safe to call twice.
        pub async fn close(&self) {
            if self.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            let handle = self.reader.lock().expect("reader handle poisoned").take();
            if let Some(handle) = handle {
                if timeout(serial::CLOSE_GRACE, handle).await.is_err() {
                    warn!("serial reader did not stop within the grace period");
                }
            }
            self.pending_status
                .lock()
                .expect("pending status map poisoned")
                .clear();
            self.pending_at
                .lock()
                .expect("pending at map poisoned")
                .clear();
            info!("closed {}", self.port_name);
        }

        fn write_wire(&self, wire: &[u8]) -> Result<(), LinkError> {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(LinkError::Disconnected);
            }
            let mut port = self.port.lock().expect("serial port poisoned");
            port.write_all(wire)
                .map_err(|e| LinkError::Transport(format!("write: {}", e)))?;
            port.flush()
                .map_err(|e| LinkError::Transport(format!("flush: {}", e)))
        }

        fn forget_status(&self, frame_id: u8) {
            self.pending_status
                .lock()
                .expect("pending status map poisoned")
                .remove(&frame_id);
        }

        fn forget_at(&self, frame_id: u8) {
            self.pending_at
                .lock()
                .expect("pending at map poisoned")
                .remove(&frame_id);
        }
    }

    fn spawn_reader(
        port: Arc<Mutex<Box<dyn SerialPort>>>,
        shutdown: Arc<AtomicBool>,
        rf_tx: mpsc::UnboundedSender<RfEvent>,
        pending_status: PendingStatus,
        pending_at: PendingAt,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut frame_parser = FrameParser::new();
            let mut scratch = [0u8; serial::SCRATCH_LEN];
            let mut failing = false;
            while !shutdown.load(Ordering::Acquire) {
                let read = {
                    let mut port = port.lock().expect("serial port poisoned");
                    serial::read_available(port.as_mut(), &mut scratch)
                };
                match read {
                    Ok(0) => sleep(Duration::from_millis(10)).await,
                    Ok(n) => {
                        failing = false;
                        for parsed in frame_parser.push(&scratch[..n]) {
                            dispatch(parsed, &rf_tx, &pending_status, &pending_at);
                        }
                    }
                    Err(e) => {
                        // Surface once, then back off so a dead adapter does
                        // not spin the loop.
                        if !failing {
                            error!("serial read failed: {}", e);
                            failing = true;
                        }
                        sleep(Duration::from_millis(250)).await;
                    }
                }
            }
            debug!("serial reader stopped");
        })
    }

    pub(super) fn dispatch(
        parsed: ApiFrame,
        rf_tx: &mpsc::UnboundedSender<RfEvent>,
        pending_status: &PendingStatus,
        pending_at: &PendingAt,
    ) {
        match parsed {
            ApiFrame::RxPacket { src64, rf_data, .. } => {
                let _ = rf_tx.send(RfEvent {
                    data: rf_data,
                    source: src64,
                });
            }
            ApiFrame::ExplicitRx { src64, rf_data, .. } => {
                // Same event shape as a plain rx packet.
                let _ = rf_tx.send(RfEvent {
                    data: rf_data,
                    source: src64,
                });
            }
            ApiFrame::TxStatus {
                frame_id,
                retries,
                delivery_status,
                discovery_status,
                ..
            } => {
                let waiter = pending_status
                    .lock()
                    .expect("pending status map poisoned")
                    .remove(&frame_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(TxStatus {
                            delivery_status,
                            retries,
                            discovery_status,
                        });
                    }
                    None => debug!("unmatched tx status for frame id {}", frame_id),
                }
            }
            ApiFrame::AtResponse {
                frame_id,
                command,
                status,
                data,
            } => {
                let waiter = pending_at
                    .lock()
                    .expect("pending at map poisoned")
                    .remove(&frame_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(AtResponse {
                            command,
                            status,
                            data,
                        });
                    }
                    None => debug!("unmatched at response for frame id {}", frame_id),
                }
            }
        }
    }
}
