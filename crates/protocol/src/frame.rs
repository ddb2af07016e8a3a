//! Host-to-device command frames
//!
//! Layout of the fixed 10-byte frame:
//!
//! | Offset | Meaning                                   |
//! |--------|-------------------------------------------|
//! | 0      | opcode (1 = set LEDs / button command)    |
//! | 1..=7  | reserved, zero                            |
//! | 8      | request button press counter (0/1)        |
//! | 9      | LED bitmask, `0xFF` leaves LEDs unchanged |

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Size of every command frame in bytes
pub const FRAME_LEN: usize = 10;

const OPCODE_OFFSET: usize = 0;
const REQUEST_COUNT_OFFSET: usize = 8;
const LEDS_OFFSET: usize = 9;

/// Command opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Set LEDs and optionally latch the button counter into the next report
    SetLeds = 1,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Opcode::SetLeds),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

/// LED bitmask as understood by the firmware
///
/// Bits 0-3 map to the four user LEDs of the discovery board. The special
/// value [`LedMask::UNCHANGED`] tells the firmware to keep the current LEDs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedMask(pub u8);

impl LedMask {
    pub const OFF: LedMask = LedMask(0x00);
    pub const GREEN: LedMask = LedMask(0x01);
    pub const ORANGE: LedMask = LedMask(0x02);
    pub const RED: LedMask = LedMask(0x04);
    pub const BLUE: LedMask = LedMask(0x08);
    pub const ALL: LedMask = LedMask(0x0F);
    pub const UNCHANGED: LedMask = LedMask(0xFF);

    /// Raw byte value
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether this mask asks the firmware to leave the LEDs alone
    pub fn is_unchanged(self) -> bool {
        self == Self::UNCHANGED
    }

    /// Whether every LED in `other` is lit in `self`
    pub fn contains(self, other: LedMask) -> bool {
        !self.is_unchanged() && (self.0 & other.0) == other.0
    }
}

impl BitOr for LedMask {
    type Output = LedMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        LedMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for LedMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for LedMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedMask({})", self)
    }
}

impl fmt::Display for LedMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unchanged() {
            return f.write_str("unchanged");
        }
        if self.0 & 0x0F == 0 {
            return f.write_str("off");
        }

        let names = [
            (LedMask::GREEN, "green"),
            (LedMask::ORANGE, "orange"),
            (LedMask::RED, "red"),
            (LedMask::BLUE, "blue"),
        ];
        let lit: Vec<&str> = names
            .iter()
            .filter(|(led, _)| self.contains(*led))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&lit.join("+"))
    }
}

/// A single command sent to the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub opcode: Opcode,
    /// Ask the firmware to put the button counter into the next report
    pub request_count: bool,
    pub leds: LedMask,
}

impl CommandFrame {
    /// Set the LEDs without asking for the press counter
    pub fn set_leds(leds: LedMask) -> Self {
        Self {
            opcode: Opcode::SetLeds,
            request_count: false,
            leds,
        }
    }

    /// Leave the LEDs alone and request the button press counter
    pub fn query_press_count() -> Self {
        Self {
            opcode: Opcode::SetLeds,
            request_count: true,
            leds: LedMask::UNCHANGED,
        }
    }

    /// Build a frame from command-line letters, applied in order
    ///
    /// `r`, `g`, `b`, `o` add a colour and `a` adds all four. `f` switches
    /// everything off, discarding letters seen before it. `s` requests the
    /// press counter and resets the mask to [`LedMask::UNCHANGED`]; colours
    /// added after it are absorbed by the `0xFF` mask, while a later `f`
    /// still clears it.
    pub fn from_letters(letters: &str) -> Result<Self> {
        let mut frame = Self::set_leds(LedMask::OFF);
        for c in letters.chars() {
            match c.to_ascii_lowercase() {
                'r' => frame.leds |= LedMask::RED,
                'g' => frame.leds |= LedMask::GREEN,
                'b' => frame.leds |= LedMask::BLUE,
                'o' => frame.leds |= LedMask::ORANGE,
                'a' => frame.leds |= LedMask::ALL,
                'f' => frame.leds = LedMask::OFF,
                's' => {
                    frame.leds = LedMask::UNCHANGED;
                    frame.request_count = true;
                }
                other => return Err(ProtocolError::InvalidLedLetter(other)),
            }
        }
        Ok(frame)
    }

    /// Encode into the fixed wire layout
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[OPCODE_OFFSET] = self.opcode as u8;
        bytes[REQUEST_COUNT_OFFSET] = u8::from(self.request_count);
        bytes[LEDS_OFFSET] = self.leds.bits();
        bytes
    }
}

impl TryFrom<&[u8]> for CommandFrame {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            opcode: Opcode::try_from(bytes[OPCODE_OFFSET])?,
            request_count: bytes[REQUEST_COUNT_OFFSET] != 0,
            leds: LedMask(bytes[LEDS_OFFSET]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_press_count_layout() {
        let bytes = CommandFrame::query_press_count().to_bytes();
        assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF]);
    }

    #[test]
    fn test_set_leds_layout() {
        let bytes = CommandFrame::set_leds(LedMask::RED | LedMask::BLUE).to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 0);
        assert_eq!(bytes[9], 0x0C);
        assert!(bytes[1..8].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_try_from_rejects_wrong_length() {
        let short = [1u8; 9];
        assert_eq!(
            CommandFrame::try_from(&short[..]),
            Err(ProtocolError::InvalidLength {
                expected: 10,
                actual: 9
            })
        );

        let long = [1u8; 11];
        assert!(CommandFrame::try_from(&long[..]).is_err());
        assert!(CommandFrame::try_from(&[][..]).is_err());
    }

    #[test]
    fn test_try_from_rejects_unknown_opcode() {
        let mut bytes = CommandFrame::query_press_count().to_bytes();
        bytes[0] = 9;
        assert_eq!(
            CommandFrame::try_from(&bytes[..]),
            Err(ProtocolError::UnknownOpcode(9))
        );
    }

    #[test]
    fn test_from_letters() {
        let leds = |letters: &str| CommandFrame::from_letters(letters).unwrap().leds;

        assert_eq!(leds("r"), LedMask::RED);
        assert_eq!(leds("rgb"), LedMask::RED | LedMask::GREEN | LedMask::BLUE);
        assert_eq!(leds("a"), LedMask::ALL);
        assert_eq!(leds("raf"), LedMask::OFF);
        assert_eq!(leds("fr"), LedMask::RED);
        assert_eq!(leds(""), LedMask::OFF);
        assert_eq!(
            CommandFrame::from_letters("rx"),
            Err(ProtocolError::InvalidLedLetter('x'))
        );
    }

    #[test]
    fn test_from_letters_press_count() {
        assert_eq!(
            CommandFrame::from_letters("s").unwrap(),
            CommandFrame::query_press_count()
        );
        assert_eq!(
            CommandFrame::from_letters("rs").unwrap(),
            CommandFrame::query_press_count()
        );
        assert_eq!(
            CommandFrame::from_letters("sr").unwrap(),
            CommandFrame::query_press_count()
        );

        let cleared = CommandFrame::from_letters("sf").unwrap();
        assert!(cleared.request_count);
        assert_eq!(cleared.leds, LedMask::OFF);
    }

    #[test]
    fn test_led_mask_display() {
        assert_eq!(LedMask::UNCHANGED.to_string(), "unchanged");
        assert_eq!(LedMask::OFF.to_string(), "off");
        assert_eq!((LedMask::GREEN | LedMask::BLUE).to_string(), "green+blue");
    }

    #[test]
    fn test_unchanged_contains_nothing() {
        assert!(!LedMask::UNCHANGED.contains(LedMask::RED));
        assert!(LedMask::ALL.contains(LedMask::RED));
    }
}
