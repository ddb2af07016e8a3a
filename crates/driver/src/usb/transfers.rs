//! Interrupt transfer execution
//!
//! Thin wrappers around rusb's blocking interrupt transfers that map rusb
//! errors to transport errors.

use common::TransferError;
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Blocking interrupt IN transfer
///
/// Unlike a polling reader, a timeout here is reported to the caller: a
/// read is a request for a fresh report and the board answers within one
/// polling interval when it is healthy.
pub fn read_interrupt(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, TransferError> {
    debug!(
        "Interrupt IN: endpoint={:#x}, len={}, timeout={}ms",
        endpoint,
        buf.len(),
        timeout.as_millis()
    );

    match handle.read_interrupt(endpoint, buf, timeout) {
        Ok(len) => {
            debug!("Interrupt IN succeeded: {} bytes", len);
            Ok(len)
        }
        Err(rusb::Error::Timeout) => {
            debug!("Interrupt IN timed out on endpoint {:#x}", endpoint);
            Err(TransferError::Timeout)
        }
        Err(e) => {
            warn!("Interrupt IN failed on endpoint {:#x}: {}", endpoint, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Blocking interrupt OUT transfer
pub fn write_interrupt(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, TransferError> {
    debug!(
        "Interrupt OUT: endpoint={:#x}, len={}, timeout={}ms",
        endpoint,
        data.len(),
        timeout.as_millis()
    );

    match handle.write_interrupt(endpoint, data, timeout) {
        Ok(len) => {
            debug!("Interrupt OUT succeeded: {} bytes", len);
            Ok(len)
        }
        Err(e) => {
            debug!("Interrupt OUT failed on endpoint {:#x}: {}", endpoint, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Map rusb::Error to a transport error
pub fn map_rusb_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Pipe => TransferError::Stall,
        rusb::Error::NoDevice | rusb::Error::NotFound => TransferError::NoDevice,
        rusb::Error::Busy => TransferError::Busy,
        rusb::Error::Overflow => TransferError::Overflow,
        rusb::Error::Io => TransferError::Io,
        rusb::Error::Interrupted => TransferError::Cancelled,
        _ => TransferError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), TransferError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), TransferError::Stall);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), TransferError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::NotFound), TransferError::NoDevice);
        assert_eq!(
            map_rusb_error(rusb::Error::Interrupted),
            TransferError::Cancelled
        );
    }

    #[test]
    fn test_unmapped_errors_keep_message() {
        match map_rusb_error(rusb::Error::Access) {
            TransferError::Other(msg) => assert!(!msg.is_empty()),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }
}
