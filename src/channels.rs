//! # Channel Encoder Module
//!
//! Converts logical channel outputs to the 12-bit wire values both FlySky
//! link variants carry, and decides when a frame carries failsafe values
//! instead of live ones.
//!
//! ## Value Ranges
//!
//! - Logical input: about -1024..=1024, center 0
//! - Wire output: 0..=0xFFF, `988 + (v + 1024) / 2` (1500 at center)
//! - Failsafe hold marker: 0xFFF
//!
//! ## Payload Layout
//!
//! ```text
//! mode (1 live, 2 failsafe) | count | count x u16 LE
//! ```
//!
//! ## Usage
//!
//! ```
//! use flysky_link::channels::{ChannelEncoder, ChannelDataMode};
//! use flysky_link::model::{BoundReceiverIdentity, ModelData};
//!
//! let model = ModelData::new(8, BoundReceiverIdentity::default());
//! let mut encoder = ChannelEncoder::new(0, 8);
//! let frame = encoder.encode(&model);
//!
//! assert_eq!(frame.mode, ChannelDataMode::Live);
//! assert_eq!(frame.values[0], 1500);
//! ```

use crate::codec::slip::FrameWriter;
use crate::model::Model;

/// Lowest wire value
pub const WIRE_VALUE_MIN: u16 = 0;

/// Highest wire value (12 bits)
pub const WIRE_VALUE_MAX: u16 = 0x0FFF;

/// Wire value telling the receiver to hold its last output
pub const FAILSAFE_HOLD_VALUE: u16 = 0x0FFF;

/// Channel frames between two failsafe frames
pub const FAILSAFE_SEND_INTERVAL: u16 = 400;

/// Most channels a single frame carries
pub const MAX_CHANNELS: usize = 18;

/// Wire value of a logical -1024
const WIRE_OFFSET: i32 = 988;

/// Logical value of a fully low channel
const LOGICAL_MIN: i32 = -1024;

/// Per-channel failsafe behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailsafeMode {
    /// Receiver keeps the last live value
    Hold,
    /// Receiver switches to a fixed logical value
    Custom(i16),
    /// Receiver falls back to the channel's trim center
    #[default]
    NotSet,
}

/// Mode byte leading every channel payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelDataMode {
    Live = 0x01,
    Failsafe = 0x02,
}

/// Scales a logical channel value to the wire range.
///
/// # Arguments
///
/// * `value` - Logical channel value, nominally -1024..=1024
///
/// # Returns
///
/// * `u16` - `988 + (value + 1024) / 2` clamped to `0..=0xFFF`
///
/// # Examples
///
/// ```
/// use flysky_link::channels::scale_to_wire;
///
/// assert_eq!(scale_to_wire(0), 1500);
/// assert_eq!(scale_to_wire(-1024), 988);
/// assert_eq!(scale_to_wire(1024), 2012);
/// ```
#[inline]
#[must_use]
pub fn scale_to_wire(value: i32) -> u16 {
    // Truncating division, so -1 maps to 1499 just like 0 maps to 1500
    let scaled = WIRE_OFFSET.saturating_add(value.saturating_add(1024) / 2);
    scaled.clamp(WIRE_VALUE_MIN as i32, WIRE_VALUE_MAX as i32) as u16
}

/// Countdown that marks one channel frame in every
/// [`FAILSAFE_SEND_INTERVAL`] as a failsafe frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailsafeCounter {
    remaining: u16,
}

impl Default for FailsafeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FailsafeCounter {
    /// Creates a counter whose first failsafe frame is the 400th.
    #[must_use]
    pub fn new() -> Self {
        Self {
            remaining: FAILSAFE_SEND_INTERVAL,
        }
    }

    /// Counts one outbound channel frame.
    ///
    /// Returns `true` when this frame must carry failsafe values.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = FAILSAFE_SEND_INTERVAL;
            return true;
        }
        false
    }

    /// Restarts the countdown.
    pub fn reset(&mut self) {
        self.remaining = FAILSAFE_SEND_INTERVAL;
    }
}

/// One encoded channel set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    pub mode: ChannelDataMode,
    pub values: Vec<u16>,
}

impl ChannelFrame {
    #[must_use]
    pub fn is_failsafe(&self) -> bool {
        self.mode == ChannelDataMode::Failsafe
    }

    /// Writes mode, count and values into an open frame.
    pub fn write_to(&self, writer: &mut FrameWriter) {
        writer.put(self.mode as u8);
        writer.put(self.values.len() as u8);
        for &value in &self.values {
            writer.put_u16_le(value);
        }
    }

    /// Logical payload bytes, as [`write_to`](Self::write_to) would emit them
    /// before escaping.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + 2 * self.values.len());
        payload.push(self.mode as u8);
        payload.push(self.values.len() as u8);
        for &value in &self.values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }
}

/// Builds channel frames for a contiguous range of model channels.
#[derive(Debug, Clone)]
pub struct ChannelEncoder {
    start: usize,
    count: usize,
    failsafe: FailsafeCounter,
}

impl ChannelEncoder {
    /// Creates an encoder for channels `start..start + count`.
    ///
    /// `count` is capped at [`MAX_CHANNELS`].
    #[must_use]
    pub fn new(start: usize, count: usize) -> Self {
        Self {
            start,
            count: count.min(MAX_CHANNELS),
            failsafe: FailsafeCounter::new(),
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.count
    }

    /// Restarts the failsafe countdown.
    pub fn reset(&mut self) {
        self.failsafe.reset();
    }

    /// Encodes the next channel frame, advancing the failsafe countdown.
    pub fn encode(&mut self, model: &dyn Model) -> ChannelFrame {
        if self.failsafe.tick() {
            ChannelFrame {
                mode: ChannelDataMode::Failsafe,
                values: self.failsafe_values(model),
            }
        } else {
            ChannelFrame {
                mode: ChannelDataMode::Live,
                values: self.live_values(model),
            }
        }
    }

    /// Live wire values, trim center applied.
    #[must_use]
    pub fn live_values(&self, model: &dyn Model) -> Vec<u16> {
        self.channels()
            .map(|ch| scale_to_wire(model.channel_value(ch) + model.channel_center_offset(ch)))
            .collect()
    }

    /// Failsafe wire values resolved per channel.
    #[must_use]
    pub fn failsafe_values(&self, model: &dyn Model) -> Vec<u16> {
        self.channels()
            .map(|ch| resolve_failsafe(model, ch))
            .collect()
    }

    fn channels(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// Wire value a channel takes when the link is lost.
#[must_use]
pub fn resolve_failsafe(model: &dyn Model, channel: usize) -> u16 {
    match model.failsafe_mode(channel) {
        FailsafeMode::Custom(value) => scale_to_wire(value as i32),
        FailsafeMode::Hold => FAILSAFE_HOLD_VALUE,
        FailsafeMode::NotSet => scale_to_wire(LOGICAL_MIN + model.channel_center_offset(channel)),
    }
}
