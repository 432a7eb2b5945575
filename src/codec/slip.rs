//! # END/ESC Frame Codec
//!
//! Byte stuffing used on the module serial link. Every frame starts and ends
//! with [`END`]; inside a frame the two reserved bytes are escaped:
//!
//! ```text
//! 0xC0 (END) -> 0xDB 0xDC
//! 0xDB (ESC) -> 0xDB 0xDD
//! ```
//!
//! The classic protocol closes a frame with a one-byte checksum,
//! `(sum of logical bytes) ^ 0xFF`. The structured protocol closes it with a
//! little-endian CRC-16/CCITT over the same logical bytes. Both trailers are
//! escaped like any other byte.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::crc::{crc16_ccitt, crc16_update, CRC16_INIT};
use super::FramingError;

/// Frame delimiter
pub const END: u8 = 0xC0;

/// Escape marker
pub const ESC: u8 = 0xDB;

/// Escaped END
pub const ESC_END: u8 = 0xDC;

/// Escaped ESC
pub const ESC_ESC: u8 = 0xDD;

/// Largest logical frame the decoder buffers before giving up
pub const MAX_FRAME_SIZE: usize = 64;

/// Append `byte` to `out`, escaping reserved values.
#[inline]
pub fn put_escaped(out: &mut BytesMut, byte: u8) {
    match byte {
        END => out.put_slice(&[ESC, ESC_END]),
        ESC => out.put_slice(&[ESC, ESC_ESC]),
        _ => out.put_u8(byte),
    }
}

/// Escape a whole buffer (no delimiters added).
pub fn escape(data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(data.len() + 4);
    for &byte in data {
        put_escaped(&mut out, byte);
    }
    out
}

/// Reverse [`escape`] on a buffer that holds no delimiters.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut pending = false;
    for &byte in data {
        if pending {
            pending = false;
            out.push(unescape_byte(byte));
        } else if byte == ESC {
            pending = true;
        } else {
            out.push(byte);
        }
    }
    out
}

#[inline]
fn unescape_byte(byte: u8) -> u8 {
    match byte {
        ESC_END => END,
        ESC_ESC => ESC,
        other => other,
    }
}

/// Mod-256 sum of logical bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Builds one outbound frame, tracking the checksum and CRC as bytes go in.
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    sum: u8,
    crc: u16,
}

impl FrameWriter {
    /// Starts a frame with the leading [`END`].
    #[must_use]
    pub fn begin() -> Self {
        let mut buf = BytesMut::with_capacity(2 * MAX_FRAME_SIZE);
        buf.put_u8(END);
        Self {
            buf,
            sum: 0,
            crc: CRC16_INIT,
        }
    }

    /// Adds one logical byte.
    pub fn put(&mut self, byte: u8) {
        self.sum = self.sum.wrapping_add(byte);
        self.crc = crc16_update(self.crc, &[byte]);
        put_escaped(&mut self.buf, byte);
    }

    /// Adds several logical bytes.
    pub fn put_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.put(byte);
        }
    }

    /// Adds a little-endian 16-bit field.
    pub fn put_u16_le(&mut self, value: u16) {
        self.put_slice(&value.to_le_bytes());
    }

    /// Running sum of everything put so far
    #[must_use]
    pub fn sum(&self) -> u8 {
        self.sum
    }

    /// Closes the frame with the classic `sum ^ 0xFF` trailer.
    #[must_use]
    pub fn finish_checksum(mut self) -> Bytes {
        put_escaped(&mut self.buf, self.sum ^ 0xFF);
        self.buf.put_u8(END);
        trace!("encoded frame: {:02X?}", &self.buf[..]);
        self.buf.freeze()
    }

    /// Closes the frame with a little-endian CRC-16 trailer.
    #[must_use]
    pub fn finish_crc16(mut self) -> Bytes {
        for byte in self.crc.to_le_bytes() {
            put_escaped(&mut self.buf, byte);
        }
        self.buf.put_u8(END);
        trace!("encoded frame: {:02X?}", &self.buf[..]);
        self.buf.freeze()
    }
}

/// Incremental decoder for END-delimited frames.
///
/// Escape state is kept across calls, so bytes may arrive one at a time.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    escape_pending: bool,
    /// Bytes are ignored until the next [`END`]
    hunting: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_FRAME_SIZE),
            escape_pending: false,
            hunting: false,
        }
    }

    /// Drops any partial frame and escape state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.escape_pending = false;
        self.hunting = false;
    }

    /// Drops any partial frame and skips input up to the next [`END`].
    ///
    /// Used after bytes were lost upstream, when whatever follows is the
    /// tail of a frame whose head is gone.
    pub fn resync(&mut self) {
        self.reset();
        self.hunting = true;
    }

    /// Feeds one wire byte.
    ///
    /// Returns the logical bytes of a frame when its closing [`END`]
    /// arrives, or an error when the frame outgrows [`MAX_FRAME_SIZE`].
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, FramingError>> {
        if self.hunting {
            self.hunting = byte != END;
            return None;
        }

        if self.escape_pending {
            self.escape_pending = false;
            return self.store(unescape_byte(byte));
        }

        match byte {
            END if self.buf.is_empty() => None,
            END => Some(Ok(std::mem::take(&mut self.buf))),
            ESC => {
                self.escape_pending = true;
                None
            }
            _ => self.store(byte),
        }
    }

    fn store(&mut self, byte: u8) -> Option<Result<Vec<u8>, FramingError>> {
        self.buf.push(byte);
        if self.buf.len() >= MAX_FRAME_SIZE {
            self.reset();
            return Some(Err(FramingError::Overflow(MAX_FRAME_SIZE)));
        }
        None
    }
}

/// Checks a classic frame's trailing checksum.
///
/// Returns the logical bytes without the checksum.
pub fn verify_checksum(frame: &[u8]) -> Result<&[u8], FramingError> {
    let (&actual, body) = frame
        .split_last()
        .ok_or(FramingError::Truncated(frame.len()))?;
    let expected = checksum(body) ^ 0xFF;
    if expected != actual {
        return Err(FramingError::Checksum { expected, actual });
    }
    Ok(body)
}

/// Checks a structured frame's trailing little-endian CRC-16.
///
/// Returns the logical bytes without the CRC.
pub fn verify_crc16(frame: &[u8]) -> Result<&[u8], FramingError> {
    if frame.len() < 2 {
        return Err(FramingError::Truncated(frame.len()));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([tail[0], tail[1]]);
    let expected = crc16_ccitt(body);
    if expected != actual {
        return Err(FramingError::Crc { expected, actual });
    }
    Ok(body)
}
