//! Device-to-host status reports

use crate::error::{ProtocolError, Result};

/// Size of a status report in bytes
pub const REPORT_LEN: usize = 10;

const PRESS_COUNT_OFFSET: usize = 1;

/// Status report read back from the interrupt IN endpoint
///
/// Only the press counter has a defined meaning; the remaining bytes are
/// kept verbatim so callers can inspect them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    raw: [u8; REPORT_LEN],
    len: usize,
}

impl StatusReport {
    /// Parse a report; at least the press counter byte must be present
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= PRESS_COUNT_OFFSET {
            return Err(ProtocolError::ReportTooShort {
                actual: bytes.len(),
            });
        }

        let len = bytes.len().min(REPORT_LEN);
        let mut raw = [0u8; REPORT_LEN];
        raw[..len].copy_from_slice(&bytes[..len]);
        Ok(Self { raw, len })
    }

    /// Cumulative number of user-button presses seen by the firmware
    pub fn press_count(&self) -> u8 {
        self.raw[PRESS_COUNT_OFFSET]
    }

    /// Report bytes as received (truncated to the report size)
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len]
    }
}
