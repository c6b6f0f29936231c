//! Serial plumbing for the radio link: port setup and the read primitives
//! used by the background reader.

use std::io::Read;
use std::time::Duration;

use log::debug;
use serialport::{DataBits, Parity, SerialPort, StopBits};

use crate::error::LinkError;

pub const DEFAULT_BAUD: u32 = 115_200;

/// Short read timeout so the reader loop stays responsive to shutdown.
pub const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Per-iteration scratch size for draining the port.
pub const SCRATCH_LEN: usize = 1024;

/// Grace period for joining the reader on close.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Open `port_name` at 8N1. Some USB serial adapters need the explicit
/// settings even though they are the defaults.
pub fn open_port(port_name: &str, baud: u32) -> Result<Box<dyn SerialPort>, LinkError> {
    let port = serialport::new(port_name, baud)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| LinkError::Transport(format!("open {}: {}", port_name, e)))?;
    debug!("opened {} at {} baud", port_name, baud);
    Ok(port)
}

/// Drain whatever the port has buffered into `scratch`. Timeouts and
/// interrupted reads are normal idle outcomes and report zero bytes.
pub fn read_available(port: &mut dyn SerialPort, scratch: &mut [u8]) -> std::io::Result<usize> {
    match port.read(scratch) {
        Ok(n) => Ok(n),
        Err(e)
            if e.kind() == std::io::ErrorKind::TimedOut
                || e.kind() == std::io::ErrorKind::Interrupted =>
        {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// Throw away whatever the device buffered before we attached, typically
/// boot chatter.
pub fn purge(port: &mut dyn SerialPort) {
    let mut scratch = [0u8; SCRATCH_LEN];
    let mut total = 0usize;
    while let Ok(n) = read_available(port, &mut scratch) {
        if n == 0 {
            break;
        }
        total += n;
    }
    if total > 0 {
        debug!("purged {} stale bytes from the port", total);
    }
}
