//! # Model Module
//!
//! The model store is the only collaborator a session writes to. Sessions
//! read live channel outputs and failsafe settings from it every tick and
//! persist a new receiver ID after a successful bind.

use crate::channels::FailsafeMode;

/// Lowest servo frequency a receiver accepts (Hz)
pub const SERVO_FREQ_MIN: u16 = 50;

/// Highest servo frequency a receiver accepts (Hz)
pub const SERVO_FREQ_MAX: u16 = 400;

/// Receiver identity remembered across power cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundReceiverIdentity {
    /// Receiver ID as received in the bind answer
    pub rx_id: [u8; 4],

    /// Receiver servo output frequency in Hz
    pub servo_freq_hz: u16,

    /// RF protocol subtype (0: AFHDS1, 1: AFHDS2, 2: AFHDS2A)
    pub protocol: u8,
}

impl Default for BoundReceiverIdentity {
    fn default() -> Self {
        Self {
            rx_id: [0; 4],
            servo_freq_hz: SERVO_FREQ_MIN,
            protocol: 0,
        }
    }
}

impl BoundReceiverIdentity {
    /// Servo frequency with out-of-range values replaced by the minimum
    #[must_use]
    pub fn sanitized_freq(&self) -> u16 {
        if (SERVO_FREQ_MIN..=SERVO_FREQ_MAX).contains(&self.servo_freq_hz) {
            self.servo_freq_hz
        } else {
            SERVO_FREQ_MIN
        }
    }
}

/// Model state consumed by the link sessions.
#[cfg_attr(test, mockall::automock)]
pub trait Model {
    /// Logical output of channel `index`, roughly -1024..=1024 around 0
    fn channel_value(&self, index: usize) -> i32;

    /// Offset of the channel's trim center from neutral, in logical units
    fn channel_center_offset(&self, index: usize) -> i32;

    /// Failsafe behavior configured for channel `index`
    fn failsafe_mode(&self, index: usize) -> FailsafeMode;

    /// Currently bound receiver
    fn bound_identity(&self) -> BoundReceiverIdentity;

    /// Stores a freshly bound receiver ID and marks the model dirty
    fn persist_bound_id(&mut self, rx_id: [u8; 4]);
}

/// In-memory model used by the host binary and tests.
#[derive(Debug, Clone)]
pub struct ModelData {
    channels: Vec<i32>,
    centers: Vec<i32>,
    failsafe: Vec<FailsafeMode>,
    identity: BoundReceiverIdentity,
    dirty: bool,
}

impl ModelData {
    /// Creates a model with `channel_count` centered channels and failsafe
    /// not set.
    #[must_use]
    pub fn new(channel_count: usize, identity: BoundReceiverIdentity) -> Self {
        Self {
            channels: vec![0; channel_count],
            centers: vec![0; channel_count],
            failsafe: vec![FailsafeMode::NotSet; channel_count],
            identity,
            dirty: false,
        }
    }

    /// Sets the live output of one channel. Out-of-range indices are ignored.
    pub fn set_channel(&mut self, index: usize, value: i32) {
        if let Some(slot) = self.channels.get_mut(index) {
            *slot = value;
        }
    }

    /// Sets a channel's trim center offset.
    pub fn set_center_offset(&mut self, index: usize, offset: i32) {
        if let Some(slot) = self.centers.get_mut(index) {
            *slot = offset;
        }
    }

    /// Sets the failsafe behavior of one channel.
    pub fn set_failsafe(&mut self, index: usize, mode: FailsafeMode) {
        if let Some(slot) = self.failsafe.get_mut(index) {
            *slot = mode;
        }
    }

    /// True once a bind has changed the stored identity.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Acknowledges that the identity has been written to storage.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl Model for ModelData {
    fn channel_value(&self, index: usize) -> i32 {
        self.channels.get(index).copied().unwrap_or(0)
    }

    fn channel_center_offset(&self, index: usize) -> i32 {
        self.centers.get(index).copied().unwrap_or(0)
    }

    fn failsafe_mode(&self, index: usize) -> FailsafeMode {
        self.failsafe
            .get(index)
            .copied()
            .unwrap_or(FailsafeMode::NotSet)
    }

    fn bound_identity(&self) -> BoundReceiverIdentity {
        self.identity
    }

    fn persist_bound_id(&mut self, rx_id: [u8; 4]) {
        self.identity.rx_id = rx_id;
        self.dirty = true;
    }
}
