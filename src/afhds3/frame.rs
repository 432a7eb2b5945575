//! # Structured Frames
//!
//! ```text
//! END | address | frame_number | frame_type | command | data... | crc16 (LE) | END
//! ```
//!
//! Everything between the END bytes is escaped like a classic frame. The
//! CRC covers the logical bytes from `address` through the data.

use bytes::Bytes;

use super::protocol::*;
use crate::channels::{ChannelDataMode, ChannelFrame};
use crate::codec::slip::{verify_crc16, FrameWriter};
use crate::codec::FramingError;

/// Typed frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameData {
    /// No payload
    Empty,
    /// Single byte: a mode, state, status or result
    Byte(u8),
    Channels(ChannelFrame),
    Settings(ModuleSettings),
    Version(VersionInfo),
    CommandResult(CommandResult),
    /// Anything without a fixed layout (telemetry, pass-through)
    Raw(Vec<u8>),
}

impl FrameData {
    /// Interprets a payload according to its command.
    pub fn decode(command: Command, payload: &[u8]) -> Result<Self, FramingError> {
        if payload.is_empty() {
            return Ok(Self::Empty);
        }

        Ok(match command {
            Command::ModuleVersion => Self::Version(VersionInfo::parse(payload)?),
            Command::CommandResult => Self::CommandResult(CommandResult::parse(payload)?),
            Command::ModuleGetConfig | Command::ModuleSetConfig
                if payload.len() >= ModuleSettings::HEADER_LEN =>
            {
                Self::Settings(ModuleSettings::parse(payload)?)
            }
            Command::ChannelsFailsafeData => Self::Channels(decode_channels(payload)?),
            _ if payload.len() == 1 => Self::Byte(payload[0]),
            _ => Self::Raw(payload.to_vec()),
        })
    }

    /// Single-byte value, if this payload is one
    #[must_use]
    pub fn byte(&self) -> Option<u8> {
        match self {
            Self::Byte(value) => Some(*value),
            _ => None,
        }
    }

    /// Logical payload bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Empty => Vec::new(),
            Self::Byte(value) => vec![*value],
            Self::Channels(channels) => channels.to_payload(),
            Self::Settings(settings) => settings.to_bytes(),
            Self::Version(version) => version.to_bytes(),
            Self::CommandResult(result) => result.to_bytes(),
            Self::Raw(data) => data.clone(),
        }
    }

    /// Writes the payload into an open frame.
    pub fn write_to(&self, writer: &mut FrameWriter) {
        match self {
            Self::Empty => {}
            Self::Byte(value) => writer.put(*value),
            Self::Channels(channels) => channels.write_to(writer),
            other => writer.put_slice(&other.to_bytes()),
        }
    }
}

fn decode_channels(payload: &[u8]) -> Result<ChannelFrame, FramingError> {
    let (&mode, rest) = payload
        .split_first()
        .ok_or(FramingError::Truncated(payload.len()))?;
    let mode = match mode {
        1 => ChannelDataMode::Live,
        2 => ChannelDataMode::Failsafe,
        other => {
            return Err(FramingError::Malformed(format!(
                "unknown channel mode {}",
                other
            )))
        }
    };
    let (&count, values) = rest
        .split_first()
        .ok_or(FramingError::Truncated(payload.len()))?;
    let values = values
        .get(..2 * count as usize)
        .ok_or(FramingError::Truncated(payload.len()))?;

    Ok(ChannelFrame {
        mode,
        values: values
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
    })
}

/// One structured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredFrame {
    pub address: u8,
    pub frame_number: u8,
    pub frame_type: FrameType,
    pub command: Command,
    pub data: FrameData,
}

impl StructuredFrame {
    /// Outbound frame addressed to the module
    #[must_use]
    pub fn new(frame_number: u8, frame_type: FrameType, command: Command, data: FrameData) -> Self {
        Self {
            address: FRAME_ADDRESS,
            frame_number,
            frame_type,
            command,
            data,
        }
    }

    /// Encodes to wire bytes, CRC and delimiters included.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut writer = FrameWriter::begin();
        writer.put(self.address);
        writer.put(self.frame_number);
        writer.put(self.frame_type as u8);
        writer.put(self.command as u8);
        self.data.write_to(&mut writer);
        writer.finish_crc16()
    }

    /// Parses the logical bytes between two END delimiters.
    pub fn parse(frame: &[u8]) -> Result<Self, FramingError> {
        let body = verify_crc16(frame)?;
        if body.len() < HEADER_LEN {
            return Err(FramingError::Truncated(body.len()));
        }

        let command = Command::try_from(body[3])?;
        Ok(Self {
            address: body[0],
            frame_number: body[1],
            frame_type: FrameType::try_from(body[2])?,
            command,
            data: FrameData::decode(command, &body[HEADER_LEN..])?,
        })
    }
}
