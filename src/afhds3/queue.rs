//! # Command Queue
//!
//! Fixed 8-slot FIFO of one-byte structured requests. One slot always stays
//! free to tell a full queue from an empty one, so at most seven entries
//! are live.

use super::protocol::{Command, FrameType};
use crate::error::{LinkError, Result};

/// Number of slots
pub const QUEUE_CAPACITY: usize = 8;

/// One queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub command: Command,
    pub frame_type: FrameType,
    pub payload: Option<u8>,
    /// Frame number to reuse when answering a module request
    pub frame_number: u8,
    pub uses_frame_number: bool,
}

/// Ring buffer of pending requests.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    slots: [Option<QueueEntry>; QUEUE_CAPACITY],
    get: usize,
    set: usize,
}

#[inline]
fn next_index(index: usize) -> usize {
    (index + 1) & (QUEUE_CAPACITY - 1)
}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.get == self.set
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        next_index(self.set) == self.get
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        (self.set + QUEUE_CAPACITY - self.get) & (QUEUE_CAPACITY - 1)
    }

    /// Appends a request.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::QueueFull`] and leaves the queue untouched when
    /// no slot is free.
    pub fn enqueue(&mut self, command: Command, frame_type: FrameType, payload: Option<u8>) -> Result<()> {
        self.push(QueueEntry {
            command,
            frame_type,
            payload,
            frame_number: 0,
            uses_frame_number: false,
        })
    }

    /// Appends an acknowledgement of a module request, reusing its frame
    /// number.
    pub fn enqueue_ack(&mut self, command: Command, frame_number: u8) -> Result<()> {
        self.push(QueueEntry {
            command,
            frame_type: FrameType::ResponseAck,
            payload: None,
            frame_number,
            uses_frame_number: true,
        })
    }

    fn push(&mut self, entry: QueueEntry) -> Result<()> {
        if self.is_full() {
            return Err(LinkError::QueueFull {
                capacity: QUEUE_CAPACITY - 1,
            });
        }
        self.slots[self.set] = Some(entry);
        self.set = next_index(self.set);
        Ok(())
    }

    /// Oldest entry, left in place
    #[must_use]
    pub fn peek(&self) -> Option<&QueueEntry> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.get].as_ref()
    }

    /// Drops the oldest entry.
    pub fn skip(&mut self) {
        if !self.is_empty() {
            self.slots[self.get] = None;
            self.get = next_index(self.get);
        }
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.peek().copied();
        self.skip();
        entry
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
