//! # Hall Frame Parser
//!
//! Byte-at-a-time state machine for the hall stick link.

use super::protocol::{HallFrame, HallId, HALL_HEAD, HALL_MAX_DATA};
use crate::codec::crc::crc16_ccitt;
use crate::codec::FramingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Head,
    Id,
    Length,
    Data,
    CrcLow,
    CrcHigh,
}

/// Streaming hall frame parser
#[derive(Debug, Clone)]
pub struct HallParser {
    state: ParseState,
    id: u8,
    length: usize,
    data: Vec<u8>,
    crc_low: u8,
}

impl Default for HallParser {
    fn default() -> Self {
        Self {
            state: ParseState::Head,
            id: 0,
            length: 0,
            data: Vec::with_capacity(HALL_MAX_DATA),
            crc_low: 0,
        }
    }
}

impl HallParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.state = ParseState::Head;
        self.data.clear();
    }

    /// Feeds one byte.
    ///
    /// Yields a frame once its CRC checks out. A bad CRC or an oversize
    /// length reports an error and restarts the search for a head byte.
    pub fn push(&mut self, byte: u8) -> Option<Result<HallFrame, FramingError>> {
        match self.state {
            ParseState::Head => {
                if byte == HALL_HEAD {
                    self.data.clear();
                    self.state = ParseState::Id;
                }
            }
            ParseState::Id => {
                self.id = byte;
                self.state = ParseState::Length;
            }
            ParseState::Length => {
                let length = byte as usize;
                if length > HALL_MAX_DATA {
                    self.reset();
                    return Some(Err(FramingError::Overflow(HALL_MAX_DATA)));
                }
                self.length = length;
                self.state = if length == 0 {
                    ParseState::CrcLow
                } else {
                    ParseState::Data
                };
            }
            ParseState::Data => {
                self.data.push(byte);
                if self.data.len() == self.length {
                    self.state = ParseState::CrcLow;
                }
            }
            ParseState::CrcLow => {
                self.crc_low = byte;
                self.state = ParseState::CrcHigh;
            }
            ParseState::CrcHigh => {
                let actual = u16::from_le_bytes([self.crc_low, byte]);
                let result = self.check(actual);
                self.reset();
                return Some(result);
            }
        }
        None
    }

    fn check(&self, actual: u16) -> Result<HallFrame, FramingError> {
        let mut covered = Vec::with_capacity(self.data.len() + 3);
        covered.extend_from_slice(&[HALL_HEAD, self.id, self.length as u8]);
        covered.extend_from_slice(&self.data);

        let expected = crc16_ccitt(&covered);
        if expected != actual {
            return Err(FramingError::Crc { expected, actual });
        }
        Ok(HallFrame::new(HallId(self.id), &self.data))
    }
}
