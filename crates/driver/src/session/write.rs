//! Asynchronous write pipeline
//!
//! A write validates the frame, copies it into a buffer the transport will
//! own, and submits it. The caller gets its answer as soon as the transfer
//! is queued. The completion callback holds its own session reference so
//! the session outlives every in-flight transfer.

use super::Session;
use super::state::lock;
use crate::error::{DriverError, Result};
use common::{Completion, LifecycleState, TransferBuffer, TransferError, TransferStatus};
use protocol::{CommandFrame, FRAME_LEN, LedMask};
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl Session {
    /// Queue one command frame for the interrupt OUT endpoint
    ///
    /// Returns the accepted length once submission succeeded; the transfer
    /// itself finishes later. Anything other than exactly one frame is
    /// rejected before any state changes.
    pub fn write(&self, frame: &[u8]) -> Result<usize> {
        if frame.len() != FRAME_LEN {
            return Err(DriverError::InvalidFrameLength {
                actual: frame.len(),
            });
        }
        if self.state() != LifecycleState::Active {
            return Err(DriverError::DeviceGone);
        }

        let leds = CommandFrame::try_from(frame).ok().map(|f| f.leds);
        let buffer = TransferBuffer::copy_from(frame, Arc::clone(&self.shared.outstanding_buffers))
            .map_err(|_| DriverError::OutOfMemory)?;

        let outbound = self.shared.endpoints.outbound;
        let held = self.acquire();

        let submitted = {
            let _request = lock(&self.shared.request_lock);
            if self.state() != LifecycleState::Active {
                // `buffer` and `held` drop here, undoing both allocations
                return Err(DriverError::DeviceGone);
            }
            trace!(
                "{}: submitting {} byte frame to {:#04x}",
                self.shared.node,
                FRAME_LEN,
                outbound.address
            );
            self.shared.transport.submit_async(
                outbound.address,
                buffer,
                outbound.interval,
                Box::new(move |completion| held.complete_write(completion, leds)),
            )
        };

        match submitted {
            Ok(id) => {
                trace!("{}: transfer {:?} queued", self.shared.node, id);
                Ok(FRAME_LEN)
            }
            Err(TransferError::NoDevice) => Err(DriverError::DeviceGone),
            Err(e) => {
                warn!("{}: failed to submit write: {}", self.shared.node, e);
                Err(DriverError::SubmissionFailed(e))
            }
        }
    }

    /// Completion callback body; consumes the reference taken at submission
    fn complete_write(self, completion: Completion, leds: Option<LedMask>) {
        let Completion { id, status, buffer } = completion;

        {
            let mut cached = lock(&self.shared.cached);
            match &status {
                TransferStatus::Completed { .. } => {
                    cached.writes_completed += 1;
                    if let Some(mask) = leds.filter(|m| !m.is_unchanged()) {
                        cached.leds = Some(mask);
                    }
                }
                TransferStatus::Cancelled | TransferStatus::Shutdown => {
                    cached.writes_cancelled += 1;
                }
                TransferStatus::Failed(e) => {
                    cached.writes_failed += 1;
                    cached.last_write_error = Some(e.clone());
                }
            }
        }

        match &status {
            TransferStatus::Completed { actual_length } => {
                trace!(
                    "{}: transfer {:?} completed ({} bytes)",
                    self.shared.node, id, actual_length
                );
            }
            s if s.is_cancellation() => {
                debug!("{}: transfer {:?} {}", self.shared.node, id, s);
            }
            s => {
                warn!("{}: transfer {:?} {}", self.shared.node, id, s);
            }
        }

        drop(buffer);
        self.release();
    }
}
