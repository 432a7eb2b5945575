//! # Hall Stick Protocol
//!
//! ```text
//! 0x55 | id | length | data[length] | crc16 (LE)
//! ```
//!
//! The CRC-16/CCITT covers the head byte through the data. Frames are not
//! escaped. The `id` byte packs sender, receiver and packet id:
//!
//! | Bits | Field     |
//! |------|-----------|
//! | 0-1  | sender    |
//! | 2-3  | receiver  |
//! | 4-7  | packet id |

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::crc::crc16_ccitt;

/// Start of every hall frame
pub const HALL_HEAD: u8 = 0x55;

/// Largest data section the parser accepts
pub const HALL_MAX_DATA: usize = 64;

/// Stick channels reported by the controller
pub const HALL_STICK_COUNT: usize = 4;

/// Packet carrying the stored calibration
pub const PACKET_CALIBRATION: u8 = 0x0E;

/// Packet carrying raw stick readings
pub const PACKET_VALUES: u8 = 0x0C;

/// Packet id of firmware requests from the host
pub const PACKET_FIRMWARE: u8 = 0x0A;

/// Packet id of controller commands from the TX MCU
pub const PACKET_COMMAND: u8 = 0x0D;

/// Endpoints on the hall bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HallAddress {
    HallStick = 0,
    TxMcu = 1,
    HostPc = 2,
    RfModule = 3,
}

impl HallAddress {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::HallStick,
            1 => Self::TxMcu,
            2 => Self::HostPc,
            _ => Self::RfModule,
        }
    }
}

/// Packed frame id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HallId(pub u8);

impl HallId {
    #[must_use]
    pub fn new(sender: HallAddress, receiver: HallAddress, packet: u8) -> Self {
        Self(((packet & 0x0F) << 4) | ((receiver as u8) << 2) | sender as u8)
    }

    #[must_use]
    pub fn sender(self) -> HallAddress {
        HallAddress::from_bits(self.0)
    }

    #[must_use]
    pub fn receiver(self) -> HallAddress {
        HallAddress::from_bits(self.0 >> 2)
    }

    #[must_use]
    pub fn packet(self) -> u8 {
        self.0 >> 4
    }
}

/// One hall frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HallFrame {
    pub id: HallId,
    pub data: Vec<u8>,
}

impl HallFrame {
    #[must_use]
    pub fn new(id: HallId, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
        }
    }

    /// Wire bytes with the CRC appended
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 5);
        buf.put_u8(HALL_HEAD);
        buf.put_u8(self.id.0);
        buf.put_u8(self.data.len() as u8);
        buf.put_slice(&self.data);
        let crc = crc16_ccitt(&buf);
        buf.put_u16_le(crc);
        buf.freeze()
    }
}

/// Asks the controller to reset: `55 D1 01 01`.
#[must_use]
pub fn reset_request() -> HallFrame {
    HallFrame::new(
        HallId::new(HallAddress::TxMcu, HallAddress::HallStick, PACKET_COMMAND),
        &[0x01],
    )
}

/// Asks for the stored calibration: `55 D1 01 00`.
#[must_use]
pub fn get_config_request() -> HallFrame {
    HallFrame::new(
        HallId::new(HallAddress::TxMcu, HallAddress::HallStick, PACKET_COMMAND),
        &[0x00],
    )
}

/// Asks for firmware info: `55 A2 00`.
#[must_use]
pub fn firmware_info_request() -> HallFrame {
    HallFrame::new(
        HallId::new(HallAddress::HostPc, HallAddress::HallStick, PACKET_FIRMWARE),
        &[],
    )
}

/// Ends a firmware update: `55 A2 01 07`.
#[must_use]
pub fn firmware_update_end_request() -> HallFrame {
    HallFrame::new(
        HallId::new(HallAddress::HostPc, HallAddress::HallStick, PACKET_FIRMWARE),
        &[0x07],
    )
}
