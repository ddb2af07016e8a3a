//! Transport collaborator interface
//!
//! The driver core never talks to libusb directly. It sees the hardware
//! through [`Transport`]: one blocking round trip for the interrupt IN
//! endpoint and one fire-and-forget submission for the interrupt OUT
//! endpoint, whose completion is delivered later on a context the
//! submitter does not control.

use std::collections::TryReserveError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Transport-level transfer failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,
    #[error("device is gone")]
    NoDevice,
    #[error("transfer cancelled")]
    Cancelled,
    #[error("endpoint stalled")]
    Stall,
    #[error("device sent more data than requested")]
    Overflow,
    #[error("transport busy")]
    Busy,
    #[error("input/output error")]
    Io,
    #[error("{0}")]
    Other(String),
}

/// Final status handed to a completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed { actual_length: usize },
    /// Unlinked before it reached the wire (close or detach)
    Cancelled,
    /// Device went away while the transfer was outstanding
    Shutdown,
    Failed(TransferError),
}

impl TransferStatus {
    /// Cancellation-class statuses are not failures
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::Shutdown)
    }

    pub fn is_benign(&self) -> bool {
        matches!(self, TransferStatus::Completed { .. }) || self.is_cancellation()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed { actual_length } => {
                write!(f, "completed ({} bytes)", actual_length)
            }
            TransferStatus::Cancelled => f.write_str("cancelled"),
            TransferStatus::Shutdown => f.write_str("shutdown"),
            TransferStatus::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Identifier assigned by the transport to a submitted transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub u64);

/// Exclusively owned buffer of an outbound transfer
///
/// Allocation bumps a shared outstanding counter and dropping the buffer
/// decrements it, so the counter reads zero once every buffer has been
/// released exactly once.
pub struct TransferBuffer {
    data: Vec<u8>,
    outstanding: Arc<AtomicUsize>,
}

impl TransferBuffer {
    /// Allocate a buffer holding a copy of `bytes`
    pub fn copy_from(bytes: &[u8], outstanding: Arc<AtomicUsize>) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len())?;
        data.extend_from_slice(bytes);
        outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(Self { data, outstanding })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// What the transport hands back when an async transfer finishes
#[derive(Debug)]
pub struct Completion {
    pub id: TransferId,
    pub status: TransferStatus,
    pub buffer: TransferBuffer,
}

/// Completion callback; `FnOnce` so it can run at most once
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Hardware access for one claimed interface
pub trait Transport: Send + Sync {
    /// Blocking interrupt transfer on an IN endpoint
    fn transfer_sync(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    /// Queue an interrupt OUT transfer without waiting for it
    ///
    /// On success the transport owns `buffer` and guarantees `on_complete`
    /// runs exactly once. On failure both are dropped before returning.
    fn submit_async(
        &self,
        endpoint: u8,
        buffer: TransferBuffer,
        interval: u8,
        on_complete: CompletionFn,
    ) -> Result<TransferId, TransferError>;

    /// The device was unplugged; new work should fail fast
    fn invalidate(&self) {}

    /// Release the device handle. Called once, by the session finalizer.
    fn release(&self) {}

    /// Short human-readable description for logs
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_counts_outstanding() {
        let outstanding = Arc::new(AtomicUsize::new(0));
        let a = TransferBuffer::copy_from(&[1, 2, 3], outstanding.clone()).unwrap();
        let b = TransferBuffer::copy_from(&[4], outstanding.clone()).unwrap();
        assert_eq!(outstanding.load(Ordering::Acquire), 2);
        assert_eq!(a.as_slice(), &[1, 2, 3]);

        drop(a);
        assert_eq!(outstanding.load(Ordering::Acquire), 1);
        drop(b);
        assert_eq!(outstanding.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_status_classification() {
        assert!(TransferStatus::Completed { actual_length: 10 }.is_benign());
        assert!(TransferStatus::Cancelled.is_cancellation());
        assert!(TransferStatus::Shutdown.is_cancellation());
        assert!(!TransferStatus::Failed(TransferError::Stall).is_benign());
        assert!(!TransferStatus::Failed(TransferError::Cancelled).is_cancellation());
    }
}
