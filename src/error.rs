use thiserror::Error;

/// Errors surfaced by the link stack.
///
/// Framing, parse, and CRC errors are local to the byte layers: they are
/// counted, logged at debug level, and recovery happens through the next
/// frame or a NACK-driven retransmit. They appear here so the codecs can
/// report *why* a buffer was rejected; callers above the codecs rarely
/// propagate them.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Malformed API frame on the wire (bad length, truncated body).
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// A fragment-protocol message failed structural validation.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// Checksum or CRC mismatch at any framing level.
    #[error("crc mismatch")]
    Crc,

    /// Serial port trouble: open failure, write to a closed port.
    #[error("transport error: {0}")]
    Transport(String),

    /// Session bookkeeping violation (overflow, reassembly inconsistency).
    #[error("session error: {0}")]
    Session(&'static str),

    /// A bounded wait elapsed without the expected response.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,

    /// The link was closed while the operation was in flight.
    #[error("disconnected")]
    Disconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
