//! Synchronized read path

use super::Session;
use super::state::lock;
use crate::error::{DriverError, Result};
use tracing::{debug, trace};

impl Session {
    /// Fetch a fresh status report into `buf`
    ///
    /// Performs one blocking interrupt IN round trip of at most one max
    /// packet. The received bytes replace the cached report, and the
    /// caller gets a copy of the first `min(received, buf.len())` of them.
    /// A zero-length `buf` returns immediately without touching the device.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let inbound = self.shared.endpoints.inbound;
        let len = usize::from(inbound.max_packet_size).min(buf.len());
        let timeout = self.shared.timeouts.read_timeout(inbound.interval);

        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(len)
            .map_err(|_| DriverError::OutOfMemory)?;
        scratch.resize(len, 0);

        let received = {
            let _request = lock(&self.shared.request_lock);
            trace!(
                "{}: interrupt IN {:#04x}, {} bytes, timeout {:?}",
                self.shared.node, inbound.address, len, timeout
            );
            self.shared
                .transport
                .transfer_sync(inbound.address, &mut scratch, timeout)
        };

        let received = match received {
            Ok(n) => n.min(len),
            Err(e) => {
                debug!("{}: read failed: {}", self.shared.node, e);
                return Err(e.into());
            }
        };

        let mut cached = lock(&self.shared.cached);
        cached.record_report(&scratch[..received]);
        let report = cached.report();
        let n = report.len().min(buf.len());
        buf[..n].copy_from_slice(&report[..n]);

        Ok(n)
    }
}
