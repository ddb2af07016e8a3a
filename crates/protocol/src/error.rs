//! Protocol error types

use thiserror::Error;

/// Errors raised while building or parsing frames
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not exactly the fixed frame size
    #[error("Invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Opcode byte is not one the firmware understands
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Status report is too short to carry the press counter
    #[error("Status report too short: {actual} bytes")]
    ReportTooShort { actual: usize },

    /// Command letters contain an unknown letter
    #[error("Invalid LED letter '{0}' (expected one of r, g, b, o, a, f, s)")]
    InvalidLedLetter(char),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 10,
            actual: 9,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected 10"));
        assert!(msg.contains("got 9"));
    }

    #[test]
    fn test_unknown_opcode_display() {
        let msg = ProtocolError::UnknownOpcode(0x7f).to_string();
        assert!(msg.contains("0x7f"));
    }
}
