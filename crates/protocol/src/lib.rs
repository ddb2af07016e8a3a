//! Wire vocabulary for the STM32 LED board
//!
//! The board speaks fixed 10-byte frames in both directions:
//!
//! - host -> device: a [`CommandFrame`] carrying an opcode, a "report the
//!   button counter" flag and an LED bitmask
//! - device -> host: a [`StatusReport`] whose second byte is the cumulative
//!   press counter of the user button
//!
//! # Example
//!
//! ```
//! use protocol::{CommandFrame, LedMask, FRAME_LEN};
//!
//! let frame = CommandFrame::query_press_count();
//! let bytes = frame.to_bytes();
//! assert_eq!(bytes.len(), FRAME_LEN);
//! assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF]);
//!
//! let parsed = CommandFrame::try_from(&bytes[..]).unwrap();
//! assert_eq!(parsed.leds, LedMask::UNCHANGED);
//! ```

pub mod error;
pub mod frame;
pub mod report;

pub use error::{ProtocolError, Result};
pub use frame::{CommandFrame, FRAME_LEN, LedMask, Opcode};
pub use report::{REPORT_LEN, StatusReport};
