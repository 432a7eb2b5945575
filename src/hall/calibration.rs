//! # Hall Stick Calibration
//!
//! Maps raw hall sensor readings onto the 12-bit ADC range using the
//! per-stick `{min, mid, max}` calibration the controller stores.
//!
//! Each half of the travel is scaled separately so that `mid` lands on
//! [`MID_ADC`] and the ends saturate [`ERROR_OFFSET`] counts before the
//! calibrated extremes:
//!
//! ```text
//! raw < mid:  adc = 2048 - 2048 * (mid - raw) / (mid - (min + 10))
//! raw >= mid: adc = 2049 + 2048 * (raw - mid) / ((max - 10) - mid)
//! ```

use super::protocol::HALL_STICK_COUNT;
use crate::codec::FramingError;

/// Counts trimmed off each calibrated extreme
pub const ERROR_OFFSET: i32 = 10;

/// ADC value of a centred stick
pub const MID_ADC: u16 = 2048;

/// Largest ADC value
pub const MAX_ADC: u16 = 4095;

/// Smallest `max - min` span on stick 0 that counts as calibrated
pub const MIN_VALID_SPAN: i32 = 1024;

/// Calibration of one stick axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StickCalibration {
    pub min: i16,
    pub mid: i16,
    pub max: i16,
}

impl StickCalibration {
    pub const LEN: usize = 6;

    /// Converts a raw reading to an ADC value.
    #[must_use]
    pub fn to_adc(&self, raw: i16) -> u16 {
        let (min, mid, max, raw) = (
            i32::from(self.min),
            i32::from(self.mid),
            i32::from(self.max),
            i32::from(raw),
        );
        let half = i32::from(MID_ADC);

        if raw < mid {
            let span = (mid - (min + ERROR_OFFSET)).max(1);
            let value = (half * (mid - raw) / span).min(half);
            (half - value) as u16
        } else {
            let span = ((max - ERROR_OFFSET) - mid).max(1);
            let value = (half * (raw - mid) / span).min(half);
            (half + value + 1).min(i32::from(MAX_ADC)) as u16
        }
    }
}

/// Calibration of all four axes as sent in a calibration packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HallCalibration(pub [StickCalibration; HALL_STICK_COUNT]);

impl HallCalibration {
    pub const LEN: usize = StickCalibration::LEN * HALL_STICK_COUNT;

    /// Parses `4 × {min, mid, max}` little-endian i16 values.
    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        let data = data
            .get(..Self::LEN)
            .ok_or(FramingError::Truncated(data.len()))?;

        let mut sticks = [StickCalibration::default(); HALL_STICK_COUNT];
        for (stick, chunk) in sticks.iter_mut().zip(data.chunks_exact(StickCalibration::LEN)) {
            *stick = StickCalibration {
                min: i16::from_le_bytes([chunk[0], chunk[1]]),
                mid: i16::from_le_bytes([chunk[2], chunk[3]]),
                max: i16::from_le_bytes([chunk[4], chunk[5]]),
            };
        }
        Ok(Self(sticks))
    }

    /// Whether the stored calibration is usable.
    ///
    /// Only stick 0 is checked.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let stick = self.0[0];
        i32::from(stick.max) - i32::from(stick.min) >= MIN_VALID_SPAN
    }

    /// Converts one set of raw readings.
    #[must_use]
    pub fn convert(&self, raw: &[i16; HALL_STICK_COUNT]) -> [u16; HALL_STICK_COUNT] {
        let mut adc = [MID_ADC; HALL_STICK_COUNT];
        for ((out, cal), &value) in adc.iter_mut().zip(self.0.iter()).zip(raw.iter()) {
            *out = cal.to_adc(value);
        }
        adc
    }
}

/// Parses `4 × i16` little-endian raw readings.
pub fn parse_raw_values(data: &[u8]) -> Result<[i16; HALL_STICK_COUNT], FramingError> {
    let data = data
        .get(..2 * HALL_STICK_COUNT)
        .ok_or(FramingError::Truncated(data.len()))?;

    let mut raw = [0i16; HALL_STICK_COUNT];
    for (value, chunk) in raw.iter_mut().zip(data.chunks_exact(2)) {
        *value = i16::from_le_bytes([chunk[0], chunk[1]]);
    }
    Ok(raw)
}
