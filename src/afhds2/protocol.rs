//! # Classic Protocol Constants and Types
//!
//! Frame types, command IDs and the logical frame layout of the classic
//! (AFHDS2) module protocol.
//!
//! ```text
//! END | frame_number | frame_type | command | payload... | checksum | END
//! ```

use crate::codec::slip::FrameWriter;
use crate::codec::FramingError;
use crate::config::{PulseMode, SerialMode};

/// Module response timeout in milliseconds
pub const MODULE_TIMEOUT_MS: u32 = 155;

/// Tick period in milliseconds
pub const PERIOD_MS: u32 = 4;

/// Ticks between two configuration requests
pub const TIMEOUT_TICKS: u32 = MODULE_TIMEOUT_MS / PERIOD_MS;

/// `RF_INIT` answer code for a ready RF chip
pub const RF_READY: u8 = 0x01;

/// Transmitter ID announced while binding
pub const TX_ID: [u8; 4] = [0x08, 0x08, 0x08, 0x08];

/// Bind power (low)
pub const BIND_POWER_LOW: u8 = 0x00;

/// TX power during a range test
pub const TX_POWER_RANGE_CHECK: u8 = 0;

/// TX power with high power enabled
pub const TX_POWER_HIGH: u8 = 170;

/// Default TX power
pub const TX_POWER_LOW: u8 = 90;

/// Range test start/stop payload
pub const RANGE_TEST_START: u8 = 0x01;
pub const RANGE_TEST_STOP: u8 = 0x00;

/// Smallest frame that carries number, type and command
pub const MIN_FRAME_LEN: usize = 3;

/// Classic frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Request the peer must answer
    RequestAck = 0x01,
    /// Request without an answer (channel data)
    RequestNack = 0x02,
    /// Answer to a request
    Answer = 0x10,
}

impl TryFrom<u8> for FrameType {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::RequestAck),
            0x02 => Ok(Self::RequestNack),
            0x10 => Ok(Self::Answer),
            other => Err(FramingError::Malformed(format!(
                "unknown frame type 0x{:02X}",
                other
            ))),
        }
    }
}

/// Classic command IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    RfInit = 0x01,
    Bind = 0x02,
    SetReceiverId = 0x03,
    RfGetConfig = 0x04,
    SendChannelData = 0x05,
    RxSensorData = 0x06,
    SetRxPwmPpm = 0x07,
    SetRxServoFreq = 0x08,
    GetVersionInfo = 0x09,
    SetRxIbusSbus = 0x0A,
    SetRxIbusServoExt = 0x0B,
    UpdateRfFirmware = 0x0C,
    SetTxPower = 0x0D,
    SetRfProtocol = 0x0E,
    TestRange = 0x0F,
    TestRfReserved = 0x10,
    UpdateRxFirmware = 0x20,
}

impl Command {
    /// Maps a wire byte to a command, `None` for unknown IDs.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::RfInit,
            0x02 => Self::Bind,
            0x03 => Self::SetReceiverId,
            0x04 => Self::RfGetConfig,
            0x05 => Self::SendChannelData,
            0x06 => Self::RxSensorData,
            0x07 => Self::SetRxPwmPpm,
            0x08 => Self::SetRxServoFreq,
            0x09 => Self::GetVersionInfo,
            0x0A => Self::SetRxIbusSbus,
            0x0B => Self::SetRxIbusServoExt,
            0x0C => Self::UpdateRfFirmware,
            0x0D => Self::SetTxPower,
            0x0E => Self::SetRfProtocol,
            0x0F => Self::TestRange,
            0x10 => Self::TestRfReserved,
            0x20 => Self::UpdateRxFirmware,
            _ => return None,
        })
    }
}

/// Firmware a version or update request is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FirmwareTarget {
    Receiver = 0x00,
    RfModule = 0x01,
}

/// Wire value of the receiver pulse mode (0: PWM, 1: PPM)
#[must_use]
pub fn pulse_mode_byte(mode: PulseMode) -> u8 {
    match mode {
        PulseMode::Pwm => 0x00,
        PulseMode::Ppm => 0x01,
    }
}

/// Wire value of the receiver serial mode (0: i-BUS, 1: S.BUS)
#[must_use]
pub fn serial_mode_byte(mode: SerialMode) -> u8 {
    match mode {
        SerialMode::Ibus => 0x00,
        SerialMode::Sbus => 0x01,
    }
}

/// A checksum-valid inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub frame_number: u8,
    pub frame_type: FrameType,
    /// Raw command byte; unknown IDs still drive the state machine
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Response {
    /// Splits checksum-stripped logical bytes into a response.
    pub fn parse(body: &[u8]) -> Result<Self, FramingError> {
        if body.len() < MIN_FRAME_LEN {
            return Err(FramingError::Truncated(body.len()));
        }

        Ok(Self {
            frame_number: body[0],
            frame_type: FrameType::try_from(body[1])?,
            command: body[2],
            payload: body[MIN_FRAME_LEN..].to_vec(),
        })
    }

    #[must_use]
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.command)
    }

    /// First payload byte, 0 when absent
    #[must_use]
    pub fn first_param(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }
}

/// Opens a classic frame: leading END, frame number, type and command.
#[must_use]
pub fn frame_header(frame_number: u8, frame_type: FrameType, command: Command) -> FrameWriter {
    let mut writer = FrameWriter::begin();
    writer.put(frame_number);
    writer.put(frame_type as u8);
    writer.put(command as u8);
    writer
}
