//! Test utilities for the LED driver
//!
//! Provides a scriptable [`MockTransport`] and descriptor builders so the
//! driver core can be exercised without hardware.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockTransport, stm32leds_interface};
//!
//! let transport = MockTransport::new();
//! transport.set_press_count(3);
//! assert_eq!(stm32leds_interface().endpoints.len(), 2);
//! ```

use crate::transport::{
    Completion, CompletionFn, TransferBuffer, TransferError, TransferId, TransferStatus, Transport,
};
use crate::usb_types::{EndpointDescriptor, InterfaceDescriptor, TransferType};
use protocol::REPORT_LEN;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interrupt IN address used by the discovery board firmware
pub const INT_IN_ADDR: u8 = 0x81;

/// Interrupt OUT address used by the discovery board firmware
pub const INT_OUT_ADDR: u8 = 0x01;

/// Interrupt IN endpoint descriptor
pub fn interrupt_in(address: u8, max_packet_size: u16, interval: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        address: address | 0x80,
        transfer_type: TransferType::Interrupt,
        max_packet_size,
        interval,
    }
}

/// Interrupt OUT endpoint descriptor
pub fn interrupt_out(address: u8, interval: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        address: address & 0x7F,
        transfer_type: TransferType::Interrupt,
        max_packet_size: 64,
        interval,
    }
}

/// Bulk endpoint descriptor (never selected by the resolver)
pub fn bulk(address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        transfer_type: TransferType::Bulk,
        max_packet_size: 512,
        interval: 0,
    }
}

/// The interface the discovery board firmware exposes
pub fn stm32leds_interface() -> InterfaceDescriptor {
    InterfaceDescriptor {
        number: 0,
        endpoints: vec![interrupt_in(INT_IN_ADDR, 64, 1), interrupt_out(INT_OUT_ADDR, 1)],
    }
}

/// Scriptable in-memory transport
///
/// Reads return a 10-byte report whose byte 1 is the simulated press
/// counter. Submitted writes are recorded and completed on a freshly
/// spawned thread, never on the submitter's. Every hardware round trip
/// marks the transport busy for its duration so overlapping round trips
/// are counted in [`MockTransport::overlaps`].
#[derive(Default)]
pub struct MockTransport {
    press_count: AtomicU8,
    latency: Mutex<Duration>,
    completion_delay: Mutex<Duration>,
    read_failure: Mutex<Option<TransferError>>,
    submit_failure: Mutex<Option<TransferError>>,
    completion_status: Mutex<Option<TransferStatus>>,
    drain_after_invalidate: AtomicBool,
    invalidated: AtomicBool,
    in_hardware: AtomicBool,
    overlaps: AtomicUsize,
    reads: AtomicUsize,
    submissions: AtomicUsize,
    releases: AtomicUsize,
    completions: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    queued_at_release: AtomicUsize,
    next_id: AtomicU64,
    written: Mutex<Vec<Vec<u8>>>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulated button counter reported in byte 1
    pub fn set_press_count(&self, count: u8) {
        self.press_count.store(count, Ordering::Release);
    }

    /// Simulate a press of the user button
    pub fn press_button(&self) {
        self.press_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Time every hardware round trip takes
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Delay between submission and the completion callback
    pub fn set_completion_delay(&self, delay: Duration) {
        *self.completion_delay.lock().unwrap() = delay;
    }

    /// Make subsequent reads fail
    pub fn fail_reads(&self, error: Option<TransferError>) {
        *self.read_failure.lock().unwrap() = error;
    }

    /// Make subsequent submissions fail synchronously
    pub fn fail_submissions(&self, error: Option<TransferError>) {
        *self.submit_failure.lock().unwrap() = error;
    }

    /// Status reported to completion callbacks (default: completed)
    pub fn set_completion_status(&self, status: Option<TransferStatus>) {
        *self.completion_status.lock().unwrap() = status;
    }

    /// Keep serving reads after the device was invalidated
    pub fn set_drain_after_invalidate(&self, drain: bool) {
        self.drain_after_invalidate.store(drain, Ordering::Release);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Number of hardware round trips that started while another was running
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::Acquire)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Acquire)
    }

    /// How many times the device handle was released
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }

    /// Submissions not yet handed to their completion when the handle was
    /// released, summed over releases
    pub fn queued_at_release(&self) -> usize {
        self.queued_at_release.load(Ordering::Acquire)
    }

    /// Completion callbacks that have returned
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::Acquire)
    }

    /// Frames that reached the (simulated) wire
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    /// Join every completion thread spawned so far
    pub fn wait_for_completions(&self) {
        let handles: Vec<JoinHandle<()>> = self.dispatchers.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.join().expect("completion thread panicked");
        }
    }

    fn enter_hardware(&self) {
        if self.in_hardware.swap(true, Ordering::AcqRel) {
            self.overlaps.fetch_add(1, Ordering::AcqRel);
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            thread::sleep(latency);
        }
    }

    fn leave_hardware(&self) {
        self.in_hardware.store(false, Ordering::Release);
    }
}

impl Transport for MockTransport {
    fn transfer_sync(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        if self.is_invalidated() && !self.drain_after_invalidate.load(Ordering::Acquire) {
            return Err(TransferError::NoDevice);
        }

        self.enter_hardware();
        self.reads.fetch_add(1, Ordering::AcqRel);
        let result = match self.read_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => {
                let mut report = [0u8; REPORT_LEN];
                report[1] = self.press_count.load(Ordering::Acquire);
                let n = buf.len().min(REPORT_LEN);
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
        };
        self.leave_hardware();
        result
    }

    fn submit_async(
        &self,
        _endpoint: u8,
        buffer: TransferBuffer,
        _interval: u8,
        on_complete: CompletionFn,
    ) -> Result<TransferId, TransferError> {
        if let Some(error) = self.submit_failure.lock().unwrap().clone() {
            return Err(error);
        }

        self.enter_hardware();
        self.submissions.fetch_add(1, Ordering::AcqRel);
        self.written.lock().unwrap().push(buffer.as_slice().to_vec());
        self.leave_hardware();

        let id = TransferId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let status = if self.is_invalidated() {
            TransferStatus::Shutdown
        } else {
            self.completion_status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(TransferStatus::Completed {
                    actual_length: buffer.len(),
                })
        };
        let delay = *self.completion_delay.lock().unwrap();
        let completions = self.completions.clone();
        let queued = self.queued.clone();
        queued.fetch_add(1, Ordering::AcqRel);

        let handle = thread::Builder::new()
            .name("mock-completion".to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                queued.fetch_sub(1, Ordering::AcqRel);
                on_complete(Completion { id, status, buffer });
                completions.fetch_add(1, Ordering::AcqRel);
            })
            .map_err(|e| TransferError::Other(e.to_string()))?;
        self.dispatchers.lock().unwrap().push(handle);

        Ok(id)
    }

    fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    fn release(&self) {
        self.queued_at_release
            .fetch_add(self.queued.load(Ordering::Acquire), Ordering::AcqRel);
        self.releases.fetch_add(1, Ordering::AcqRel);
    }

    fn describe(&self) -> String {
        "mock transport".to_string()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
