//! # xbmesh - Reliable messaging over XBee DigiMesh radios
//!
//! xbmesh turns a serial-attached XBee radio in API Mode 2 into a reliable,
//! message-oriented link: applications hand it byte strings up to 10 KiB and
//! a 64-bit destination address, and it takes care of framing, fragmentation,
//! CRC protection, selective retransmission, and end-to-end acknowledgement.
//!
//! ## Features
//!
//! - **API Mode 2 transport**: escaped frame encoding and a resynchronizing
//!   stream parser for Transmit Request, Receive Packet, Explicit Rx,
//!   Transmit Status, and AT Command frames.
//! - **Fragment protocol**: messages split into small CRC-guarded fragments,
//!   reassembled at the receiver, recovered with selective NACKs and
//!   confirmed with a DONE acknowledgement.
//! - **Concurrent sends**: any number of messages in flight, each with its
//!   own session and completion signal.
//! - **Async design**: built on Tokio; a background reader drains the port
//!   and a periodic sweep times out idle sessions.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use xbmesh::config::ProtocolConfig;
//! use xbmesh::link::MeshLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = MeshLink::connect("/dev/ttyUSB0", 115_200, &ProtocolConfig::default()).await?;
//!     let delivered = link.send_message(b"hello", 0x0013_A200_4000_0001).await?;
//!     println!("delivered: {}", delivered);
//!     Ok(())
//! }
//! ```
//!
//! ## Module organization
//!
//! - [`link`] - the [`MeshLink`](link::MeshLink) facade applications talk to
//! - [`protocol`] - fragment codec, sessions, receiver, transmitter
//! - [`xbee`] - API frame codec, stream parser, serial device
//! - [`config`] - TOML configuration
//! - [`metrics`] - link statistics counters
//!
//! ## Architecture
//!
//! ```text
//! application
//!     │ send_message / message stream
//! ┌───────────┐
//! │  MeshLink │ facade, pumps, housekeeping
//! └───────────┘
//!     │ fragments, NACK, DONE
//! ┌───────────┐
//! │ protocol  │ sessions + reassembly + retransmission
//! └───────────┘
//!     │ rf payloads by 64-bit address
//! ┌───────────┐
//! │   xbee    │ API Mode 2 frames over the serial port
//! └───────────┘
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod protocol;
pub mod xbee;

pub use error::LinkError;
