//! # Frame Codec Module
//!
//! Byte-level framing shared by the FlySky link protocols.
//!
//! This module handles:
//! - END/ESC byte stuffing for the module serial link
//! - Running 8-bit sum checksum (classic protocol)
//! - CRC-16/CCITT (structured protocol and hall stick link)
//! - Frame sequence numbering

pub mod crc;
pub mod slip;

use thiserror::Error;

/// Reasons an inbound frame is discarded before reaching a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Sum checksum did not match
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// CRC-16 did not match
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// Frame shorter than its fixed header
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    /// Receive buffer filled before a frame delimiter arrived
    #[error("frame exceeds {0} bytes")]
    Overflow(usize),

    /// Unknown frame type or command byte
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Frame sequence counter.
///
/// Cycles through 1..=255; zero is never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter(u8);

impl Default for FrameCounter {
    fn default() -> Self {
        Self(1)
    }
}

impl FrameCounter {
    /// Creates a counter starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the next outbound frame will carry.
    #[must_use]
    pub fn current(&self) -> u8 {
        self.0
    }

    /// Forces the next outbound number. Zero is mapped to 1.
    pub fn set(&mut self, value: u8) {
        self.0 = if value == 0 { 1 } else { value };
    }

    /// Returns the current number and advances, skipping zero.
    pub fn next_number(&mut self) -> u8 {
        let number = self.0;
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_one() {
        let counter = FrameCounter::new();
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn test_counter_wraps_to_one() {
        let mut counter = FrameCounter::new();
        counter.set(255);
        assert_eq!(counter.next_number(), 255);
        assert_eq!(counter.current(), 1);
        assert_eq!(counter.next_number(), 1);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_counter_never_yields_zero() {
        let mut counter = FrameCounter::new();
        for _ in 0..1000 {
            assert_ne!(counter.next_number(), 0);
        }
    }

    #[test]
    fn test_counter_set_zero_maps_to_one() {
        let mut counter = FrameCounter::new();
        counter.set(0);
        assert_eq!(counter.current(), 1);
    }
}
