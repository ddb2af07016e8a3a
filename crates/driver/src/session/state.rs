//! Lifecycle flag and cached device state

use common::{LifecycleState, TransferError};
use protocol::{LedMask, REPORT_LEN};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle state readable without taking any lock
pub(crate) struct AtomicLifecycle(AtomicU8);

impl AtomicLifecycle {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; false if the state was something else
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn store(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Last known device state, guarded by the session's state guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedState {
    /// Most recent status report
    pub report: [u8; REPORT_LEN],
    /// Valid bytes in `report`
    pub report_len: usize,
    /// Button counter from the most recent report
    pub press_count: u8,
    /// LEDs set by the last completed write, if known
    pub leds: Option<LedMask>,
    pub writes_completed: u64,
    pub writes_cancelled: u64,
    pub writes_failed: u64,
    pub last_write_error: Option<TransferError>,
}

impl Default for CachedState {
    fn default() -> Self {
        Self {
            report: [0; REPORT_LEN],
            report_len: 0,
            press_count: 0,
            leds: None,
            writes_completed: 0,
            writes_cancelled: 0,
            writes_failed: 0,
            last_write_error: None,
        }
    }
}

impl CachedState {
    /// Store a fresh report; bytes beyond the report size are dropped
    pub(crate) fn record_report(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(REPORT_LEN);
        self.report[..len].copy_from_slice(&bytes[..len]);
        self.report_len = len;
        if len > 1 {
            self.press_count = self.report[1];
        }
    }

    /// Valid bytes of the most recent report
    pub fn report(&self) -> &[u8] {
        &self.report[..self.report_len]
    }
}

/// Lock a mutex, recovering the data if a holder panicked
///
/// Both guarded values stay consistent across a panic: the request lock
/// guards no data and the cached state is overwritten field by field.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
