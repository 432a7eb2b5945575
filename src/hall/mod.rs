//! # Hall Stick Module
//!
//! Link to the hall-sensor gimbal controller.
//!
//! This module handles:
//! - Framing and parsing the controller's `0x55`-headed frames
//! - Tracking the stick calibration and re-requesting it while invalid
//! - Converting raw readings to ADC values and logical channel values
//! - Sequencing the reset/firmware-info requests of a firmware update

pub mod calibration;
pub mod parser;
pub mod protocol;

pub use calibration::{HallCalibration, StickCalibration, MAX_ADC, MID_ADC};
pub use parser::HallParser;
pub use protocol::{HallAddress, HallFrame, HallId, HALL_STICK_COUNT};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use calibration::parse_raw_values;
use protocol::*;

/// Interval between calibration requests while the calibration is invalid
pub const CONFIG_RETRY_MS: u64 = 2000;

/// Interval between firmware-update sequencing steps
pub const SEND_STEP_MS: u64 = 10;

/// Outbound sequencing of the controller link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HallSendState {
    Idle,
    SendReset,
    GetFirmware,
    UpdateFirmware,
}

/// Something the link learned from an inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HallEvent {
    CalibrationReceived(HallCalibration),
    /// Converted ADC values, before stick reversal
    ValuesReceived([u16; HALL_STICK_COUNT]),
    /// Frame meant for the host or the controller itself, forwarded as-is
    PassThrough(HallFrame),
}

/// State of the hall stick link
#[derive(Debug, Clone)]
pub struct HallStickLink {
    parser: HallParser,
    calibration: HallCalibration,
    adc: [u16; HALL_STICK_COUNT],
    stick_state: u8,
    send_state: HallSendState,
    last_config_ms: Option<u64>,
    last_step_ms: u64,
}

impl Default for HallStickLink {
    fn default() -> Self {
        Self {
            parser: HallParser::new(),
            calibration: HallCalibration::default(),
            adc: [MID_ADC; HALL_STICK_COUNT],
            stick_state: 0,
            send_state: HallSendState::Idle,
            last_config_ms: None,
            last_step_ms: 0,
        }
    }
}

impl HallStickLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calibration(&self) -> &HallCalibration {
        &self.calibration
    }

    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_valid()
    }

    #[must_use]
    pub fn send_state(&self) -> HallSendState {
        self.send_state
    }

    /// Trailing status byte of the last frame
    #[must_use]
    pub fn stick_state(&self) -> u8 {
        self.stick_state
    }

    /// ADC value of a stick; sticks 0 and 1 are reversed.
    ///
    /// Out-of-range sticks read 0.
    #[must_use]
    pub fn adc_value(&self, stick: usize) -> u16 {
        match self.adc.get(stick) {
            Some(&value) if stick < 2 => MAX_ADC.saturating_sub(value),
            Some(&value) => value,
            None => 0,
        }
    }

    /// Stick position in the logical -1024..=1024 channel range
    #[must_use]
    pub fn channel_value(&self, stick: usize) -> i16 {
        let offset = i32::from(self.adc_value(stick)) - i32::from(MID_ADC);
        (offset * 1024 / i32::from(MID_ADC)).clamp(-1024, 1024) as i16
    }

    /// Feeds one received byte.
    pub fn on_byte(&mut self, byte: u8) -> Option<HallEvent> {
        match self.parser.push(byte)? {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                debug!("Dropped hall frame: {}", e);
                None
            }
        }
    }

    fn handle_frame(&mut self, frame: HallFrame) -> Option<HallEvent> {
        if let Some(&last) = frame.data.last() {
            self.stick_state = last;
        }

        match frame.id.receiver() {
            HallAddress::TxMcu => match frame.id.packet() {
                PACKET_CALIBRATION => match HallCalibration::parse(&frame.data) {
                    Ok(calibration) => {
                        info!("Hall calibration received: {:?}", calibration.0);
                        self.calibration = calibration;
                        Some(HallEvent::CalibrationReceived(calibration))
                    }
                    Err(e) => {
                        warn!("Bad hall calibration packet: {}", e);
                        None
                    }
                },
                PACKET_VALUES => match parse_raw_values(&frame.data) {
                    Ok(raw) => {
                        self.adc = self.calibration.convert(&raw);
                        trace!("Hall raw {:?} -> adc {:?}", raw, self.adc);
                        Some(HallEvent::ValuesReceived(self.adc))
                    }
                    Err(e) => {
                        warn!("Bad hall values packet: {}", e);
                        None
                    }
                },
                other => {
                    trace!("Ignoring hall packet 0x{:X}", other);
                    None
                }
            },
            HallAddress::HostPc => {
                if matches!(frame.data[..], [0x05] | [0x06]) {
                    debug!("Hall firmware update acknowledged, back to idle");
                    self.send_state = HallSendState::Idle;
                }
                Some(HallEvent::PassThrough(frame))
            }
            HallAddress::HallStick => Some(HallEvent::PassThrough(frame)),
            HallAddress::RfModule => None,
        }
    }

    /// Starts the reset/firmware-info sequence of a firmware update.
    pub fn start_firmware_update(&mut self) {
        info!("Starting hall stick firmware update");
        self.send_state = HallSendState::SendReset;
    }

    /// Ends a firmware update, returning the end request to send.
    pub fn finish_firmware_update(&mut self) -> Bytes {
        info!("Finishing hall stick firmware update");
        self.send_state = HallSendState::Idle;
        firmware_update_end_request().encode()
    }

    /// Periodic processing.
    ///
    /// `now_ms` is a monotonic millisecond clock. Returns a request to send
    /// to the controller, if one is due.
    pub fn tick(&mut self, now_ms: u64) -> Option<Bytes> {
        if self.send_state != HallSendState::Idle {
            if now_ms.saturating_sub(self.last_step_ms) < SEND_STEP_MS {
                return None;
            }
            self.last_step_ms = now_ms;
            return match self.send_state {
                HallSendState::SendReset => {
                    self.send_state = HallSendState::GetFirmware;
                    Some(reset_request().encode())
                }
                HallSendState::GetFirmware => {
                    self.send_state = HallSendState::UpdateFirmware;
                    Some(firmware_info_request().encode())
                }
                _ => None,
            };
        }

        if self.calibration.is_valid() {
            return None;
        }

        let due = match self.last_config_ms {
            Some(last) => now_ms.saturating_sub(last) > CONFIG_RETRY_MS,
            None => true,
        };
        if !due {
            return None;
        }

        debug!("Hall calibration invalid, requesting config");
        self.last_config_ms = Some(now_ms);
        Some(get_config_request().encode())
    }
}
