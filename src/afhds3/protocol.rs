//! # Structured Protocol Constants and Types
//!
//! Frame types, commands, module states and the little-endian payload
//! layouts of the structured (AFHDS3) module protocol.

use serde::Serialize;

use crate::channels::{resolve_failsafe, FailsafeMode, MAX_CHANNELS};
use crate::codec::FramingError;
use crate::config::{ModuleConfig, PulseMode, SerialMode};
use crate::model::Model;

/// Device addresses
pub const DEVICE_TRANSMITTER: u8 = 0x01;
pub const DEVICE_MODULE: u8 = 0x03;

/// Address byte of every outbound frame
pub const FRAME_ADDRESS: u8 = DEVICE_TRANSMITTER | (DEVICE_MODULE << 4);

/// Response timeout in milliseconds
pub const COMMAND_TIMEOUT_MS: u64 = 5;

/// Sends of one command before it is abandoned
pub const COMMAND_REPEAT_COUNT: u16 = 5;

/// Idle ticks between two `MODULE_STATE` polls
pub const STATE_POLL_TICKS: u32 = 150;

/// Config failsafe marker for "keep last value"
pub const FAILSAFE_KEEP_LAST: u16 = 0x8000;

/// `MODULE_READY` payload of a ready module
pub const MODULE_STATUS_READY: u8 = 0x02;

/// Address, number, type and command
pub const HEADER_LEN: usize = 4;

/// Structured frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    RequestGetData = 0x01,
    RequestSetExpectData = 0x02,
    RequestSetExpectAck = 0x03,
    RequestSetNoResp = 0x05,
    ResponseData = 0x10,
    ResponseAck = 0x20,
}

impl FrameType {
    /// True for requests the peer must answer
    #[must_use]
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            Self::RequestGetData | Self::RequestSetExpectData | Self::RequestSetExpectAck
        )
    }

    #[must_use]
    pub fn is_response(self) -> bool {
        matches!(self, Self::ResponseData | Self::ResponseAck)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::RequestGetData),
            0x02 => Ok(Self::RequestSetExpectData),
            0x03 => Ok(Self::RequestSetExpectAck),
            0x05 => Ok(Self::RequestSetNoResp),
            0x10 => Ok(Self::ResponseData),
            0x20 => Ok(Self::ResponseAck),
            other => Err(FramingError::Malformed(format!(
                "unknown frame type 0x{:02X}",
                other
            ))),
        }
    }
}

/// Structured commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ModuleReady = 0x01,
    ModuleState = 0x02,
    ModuleMode = 0x03,
    ModuleSetConfig = 0x04,
    ModuleGetConfig = 0x06,
    ChannelsFailsafeData = 0x07,
    TelemetryData = 0x09,
    SendCommand = 0x0C,
    CommandResult = 0x0D,
    ModulePowerStatus = 0x0F,
    ModuleVersion = 0x1F,
}

impl TryFrom<u8> for Command {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::ModuleReady,
            0x02 => Self::ModuleState,
            0x03 => Self::ModuleMode,
            0x04 => Self::ModuleSetConfig,
            0x06 => Self::ModuleGetConfig,
            0x07 => Self::ChannelsFailsafeData,
            0x09 => Self::TelemetryData,
            0x0C => Self::SendCommand,
            0x0D => Self::CommandResult,
            0x0F => Self::ModulePowerStatus,
            0x1F => Self::ModuleVersion,
            other => {
                return Err(FramingError::Malformed(format!(
                    "unknown command 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// State reported by the module. `NotReady` and `Ready` are local states
/// the module never sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ModuleState {
    NotReady = 0x00,
    HwError = 0x01,
    Binding = 0x02,
    SyncRunning = 0x03,
    SyncDone = 0x04,
    Standby = 0x05,
    UpdatingWait = 0x06,
    UpdatingMod = 0x07,
    UpdatingRx = 0x08,
    UpdatingRxFailed = 0x09,
    RfTesting = 0x0A,
    Ready = 0x0B,
    HwTest = 0xFF,
}

impl ModuleState {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::NotReady,
            0x01 => Self::HwError,
            0x02 => Self::Binding,
            0x03 => Self::SyncRunning,
            0x04 => Self::SyncDone,
            0x05 => Self::Standby,
            0x06 => Self::UpdatingWait,
            0x07 => Self::UpdatingMod,
            0x08 => Self::UpdatingRx,
            0x09 => Self::UpdatingRxFailed,
            0x0A => Self::RfTesting,
            0x0B => Self::Ready,
            0xFF => Self::HwTest,
            _ => return None,
        })
    }

    /// Link to the receiver is being established or is up
    #[must_use]
    pub fn is_sync(self) -> bool {
        matches!(self, Self::SyncRunning | Self::SyncDone)
    }

    #[must_use]
    pub fn is_updating(self) -> bool {
        matches!(
            self,
            Self::UpdatingWait | Self::UpdatingMod | Self::UpdatingRx | Self::UpdatingRxFailed
        )
    }
}

/// Operating mode requested with `MODULE_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleMode {
    Standby = 0x01,
    /// Module enters run mode once bound
    Bind = 0x02,
    Run = 0x03,
    /// Module returns to standby after a successful update
    RxUpdate = 0x04,
}

impl ModuleMode {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Standby),
            0x02 => Some(Self::Bind),
            0x03 => Some(Self::Run),
            0x04 => Some(Self::RxUpdate),
            _ => None,
        }
    }

    /// Module state reached once the module accepts this mode
    #[must_use]
    pub fn resulting_state(self) -> ModuleState {
        match self {
            Self::Standby => ModuleState::Standby,
            Self::Bind => ModuleState::Binding,
            Self::Run => ModuleState::Ready,
            Self::RxUpdate => ModuleState::UpdatingRx,
        }
    }
}

/// Result byte of acknowledgements and `COMMAND_RESULT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdResult {
    Failure = 0x01,
    Success = 0x02,
}

impl CmdResult {
    /// Anything but `SUCCESS` counts as failure.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == Self::Success as u8 {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Where the module draws power from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum PowerSource {
    Internal = 0x01,
    External = 0x02,
}

impl PowerSource {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Internal),
            0x02 => Some(Self::External),
            _ => None,
        }
    }
}

/// Wire value of the receiver pulse mode (0: PWM, 1: PPM)
#[must_use]
pub fn pulse_mode_byte(mode: PulseMode) -> u8 {
    match mode {
        PulseMode::Pwm => 0x00,
        PulseMode::Ppm => 0x01,
    }
}

/// Wire value of the receiver serial mode (0: i-BUS, 2: S.BUS)
#[must_use]
pub fn serial_mode_byte(mode: SerialMode) -> u8 {
    match mode {
        SerialMode::Ibus => 0x00,
        SerialMode::Sbus => 0x02,
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// `MODULE_VERSION` answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VersionInfo {
    pub product_number: u32,
    pub hardware_version: u32,
    pub bootloader_version: u32,
    pub firmware_version: u32,
    pub rf_version: u32,
}

impl VersionInfo {
    pub const LEN: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < Self::LEN {
            return Err(FramingError::Truncated(data.len()));
        }
        Ok(Self {
            product_number: read_u32_le(data, 0),
            hardware_version: read_u32_le(data, 4),
            bootloader_version: read_u32_le(data, 8),
            firmware_version: read_u32_le(data, 12),
            rf_version: read_u32_le(data, 16),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        [
            self.product_number,
            self.hardware_version,
            self.bootloader_version,
            self.firmware_version,
            self.rf_version,
        ]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
    }
}

/// `COMMAND_RESULT` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    pub command: u16,
    pub result: CmdResult,
    pub resp_len: u8,
}

impl CommandResult {
    pub const LEN: usize = 4;

    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < Self::LEN {
            return Err(FramingError::Truncated(data.len()));
        }
        Ok(Self {
            command: u16::from_le_bytes([data[0], data[1]]),
            result: CmdResult::from_u8(data[2]),
            resp_len: data[3],
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.command.to_le_bytes().to_vec();
        out.push(self.result as u8);
        out.push(self.resp_len);
        out
    }
}

/// Module configuration carried by `MODULE_SET_CONFIG`/`MODULE_GET_CONFIG`.
///
/// ```text
/// bind_power | run_power | emi_standard | telemetry | pwm_freq (u16)
/// pulse_mode | serial_mode | channel_count | failsafe_timeout (u16)
/// failsafe[channel_count] (u16)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSettings {
    pub bind_power: u8,
    pub run_power: u8,
    pub emi_standard: u8,
    pub telemetry: bool,
    pub pwm_freq: u16,
    pub pulse_mode: u8,
    pub serial_mode: u8,
    pub failsafe_timeout: u16,
    /// Wire value per channel, [`FAILSAFE_KEEP_LAST`] for hold
    pub failsafe: Vec<u16>,
}

impl ModuleSettings {
    /// Fixed part before the failsafe array
    pub const HEADER_LEN: usize = 11;

    /// Builds the settings to push to the module.
    ///
    /// Failsafe values come from the model; hold channels carry
    /// [`FAILSAFE_KEEP_LAST`], the rest the wire value they would take.
    #[must_use]
    pub fn from_config(config: &ModuleConfig, model: &dyn Model) -> Self {
        let count = config.channel_count.min(MAX_CHANNELS);
        let failsafe = (config.channels_start..config.channels_start + count)
            .map(|ch| match model.failsafe_mode(ch) {
                FailsafeMode::Hold => FAILSAFE_KEEP_LAST,
                _ => resolve_failsafe(model, ch),
            })
            .collect();

        Self {
            bind_power: config.bind_power,
            run_power: config.run_power,
            emi_standard: config.emi_standard,
            telemetry: config.telemetry,
            pwm_freq: model.bound_identity().sanitized_freq(),
            pulse_mode: pulse_mode_byte(config.pulse_mode),
            serial_mode: serial_mode_byte(config.serial_mode),
            failsafe_timeout: config.failsafe_timeout_ms,
            failsafe,
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.failsafe.len()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + 2 * self.failsafe.len());
        out.extend_from_slice(&[
            self.bind_power,
            self.run_power,
            self.emi_standard,
            u8::from(self.telemetry),
        ]);
        out.extend_from_slice(&self.pwm_freq.to_le_bytes());
        out.extend_from_slice(&[
            self.pulse_mode,
            self.serial_mode,
            self.failsafe.len() as u8,
        ]);
        out.extend_from_slice(&self.failsafe_timeout.to_le_bytes());
        for value in &self.failsafe {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < Self::HEADER_LEN {
            return Err(FramingError::Truncated(data.len()));
        }
        let count = data[8] as usize;
        if count > MAX_CHANNELS {
            return Err(FramingError::Malformed(format!(
                "config for {} channels",
                count
            )));
        }
        let values = data
            .get(Self::HEADER_LEN..Self::HEADER_LEN + 2 * count)
            .ok_or(FramingError::Truncated(data.len()))?;

        Ok(Self {
            bind_power: data[0],
            run_power: data[1],
            emi_standard: data[2],
            telemetry: data[3] != 0,
            pwm_freq: u16::from_le_bytes([data[4], data[5]]),
            pulse_mode: data[6],
            serial_mode: data[7],
            failsafe_timeout: u16::from_le_bytes([data[9], data[10]]),
            failsafe: values
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        })
    }
}
