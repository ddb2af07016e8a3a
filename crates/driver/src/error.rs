//! Driver error types

use common::{Direction, TransferError};
use protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Errors surfaced by attach, open, read and write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Interface lacks an interrupt endpoint in the given direction
    #[error("no interrupt {0:?} endpoint on interface")]
    EndpointNotFound(Direction),

    /// No usable session behind the key or node name
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Write payload is not exactly one command frame
    #[error("invalid frame length: expected 10 bytes, got {actual}")]
    InvalidFrameLength { actual: usize },

    #[error("transfer timed out")]
    TransferTimeout,

    /// Device was unplugged
    #[error("device is gone")]
    DeviceGone,

    /// Transport refused the outbound transfer
    #[error("failed to submit transfer: {0}")]
    SubmissionFailed(TransferError),

    /// Transfer buffer allocation failed
    #[error("out of memory")]
    OutOfMemory,

    #[error("transfer failed: {0}")]
    Transfer(TransferError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<TransferError> for DriverError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Timeout => DriverError::TransferTimeout,
            TransferError::NoDevice => DriverError::DeviceGone,
            other => DriverError::Transfer(other),
        }
    }
}

impl From<DriverError> for io::Error {
    fn from(err: DriverError) -> Self {
        let kind = match &err {
            DriverError::DeviceNotFound(_) | DriverError::EndpointNotFound(_) => {
                io::ErrorKind::NotFound
            }
            DriverError::InvalidFrameLength { .. } | DriverError::Protocol(_) => {
                io::ErrorKind::InvalidInput
            }
            DriverError::TransferTimeout => io::ErrorKind::TimedOut,
            DriverError::DeviceGone => io::ErrorKind::NotConnected,
            DriverError::OutOfMemory => io::ErrorKind::OutOfMemory,
            DriverError::SubmissionFailed(_) | DriverError::Transfer(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Type alias for driver results
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_mapping() {
        assert_eq!(
            DriverError::from(TransferError::Timeout),
            DriverError::TransferTimeout
        );
        assert_eq!(
            DriverError::from(TransferError::NoDevice),
            DriverError::DeviceGone
        );
        assert_eq!(
            DriverError::from(TransferError::Stall),
            DriverError::Transfer(TransferError::Stall)
        );
    }

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = DriverError::InvalidFrameLength { actual: 9 }.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let err: io::Error = DriverError::DeviceGone.into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let err: io::Error = DriverError::DeviceNotFound("stm32leds3".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_display() {
        let msg = DriverError::InvalidFrameLength { actual: 9 }.to_string();
        assert!(msg.contains("got 9"));
    }
}
