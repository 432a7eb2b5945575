//! # Receive Ring
//!
//! Fixed single-producer/single-consumer byte ring between the serial
//! receive path and the tick. On overflow the whole ring is dropped; the
//! caller must tell the frame decoder to resynchronize.

use heapless::Deque;
use tracing::warn;

/// Ring size in bytes
pub const RING_CAPACITY: usize = 512;

/// Bounded receive buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteRing {
    buf: Deque<u8, RING_CAPACITY>,
    overflows: u32,
}

impl ByteRing {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Deque::new(),
            overflows: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Times the ring was dropped for lack of space
    #[must_use]
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Stores one byte.
    ///
    /// Returns `false` when the ring was full; everything buffered, this
    /// byte included, is discarded.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.buf.push_back(byte).is_err() {
            self.overflows = self.overflows.saturating_add(1);
            warn!("Receive ring overflow, dropping {} bytes", self.buf.len() + 1);
            self.buf.clear();
            return false;
        }
        true
    }

    /// Stores a run of bytes, returning how many are still buffered from it.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        let mut kept = 0;
        for &byte in data {
            if self.push(byte) {
                kept += 1;
            } else {
                kept = 0;
            }
        }
        kept
    }

    /// Takes the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Iterator for ByteRing {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ring = ByteRing::new();
        ring.push_slice(&[1, 2, 3]);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.by_ref().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraps_around() {
        let mut ring = ByteRing::new();
        for round in 0..3 {
            for i in 0..400u16 {
                assert!(ring.push((i as u8).wrapping_add(round)));
            }
            for i in 0..400u16 {
                assert_eq!(ring.pop(), Some((i as u8).wrapping_add(round)));
            }
        }
        assert_eq!(ring.overflows(), 0);
    }

    #[test]
    fn test_overflow_resets() {
        let mut ring = ByteRing::new();
        for i in 0..RING_CAPACITY {
            assert!(ring.push(i as u8));
        }
        assert!(!ring.push(0xAA));
        assert!(ring.is_empty());
        assert_eq!(ring.overflows(), 1);

        // Usable again afterwards
        assert!(ring.push(0x55));
        assert_eq!(ring.pop(), Some(0x55));
    }

    #[test]
    fn test_push_slice_reports_survivors() {
        let mut ring = ByteRing::new();
        ring.push_slice(&[0; RING_CAPACITY - 2]);
        let kept = ring.push_slice(&[1, 2, 3, 4, 5]);
        // 2 fit, the third overflows and resets, then 4 and 5 land
        assert_eq!(kept, 2);
        assert_eq!(ring.by_ref().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_clear_keeps_overflow_count() {
        let mut ring = ByteRing::new();
        ring.push_slice(&[0; RING_CAPACITY + 1]);
        ring.push_slice(&[7; RING_CAPACITY + 1]);
        assert_eq!(ring.overflows(), 2);

        ring.push(9);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.overflows(), 2);
    }
}
