//! Consumer file handle
//!
//! A [`DeviceFile`] is what `open` returns: one counted session reference
//! with a byte-exact read/write contract. Closing the file (or dropping
//! it) releases the reference.

use crate::error::Result;
use crate::session::Session;
use protocol::{CommandFrame, REPORT_LEN, StatusReport};
use std::io;

/// Open handle on a device node
#[derive(Debug)]
pub struct DeviceFile {
    session: Session,
}

impl DeviceFile {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Read the current status report; see [`Session::read`]
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.session.read(buf)
    }

    /// Queue a raw 10-byte command frame; see [`Session::write`]
    pub fn write(&self, frame: &[u8]) -> Result<usize> {
        self.session.write(frame)
    }

    pub fn send(&self, frame: &CommandFrame) -> Result<usize> {
        self.write(&frame.to_bytes())
    }

    /// Read and parse one status report
    pub fn read_report(&self) -> Result<StatusReport> {
        let mut buf = [0u8; REPORT_LEN];
        let n = self.read(&mut buf)?;
        Ok(StatusReport::parse(&buf[..n])?)
    }

    pub fn node(&self) -> &str {
        self.session.node()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn close(self) {
        self.session.release();
    }
}

impl io::Read for DeviceFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        DeviceFile::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for DeviceFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        DeviceFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
