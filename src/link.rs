//! # Link Session Interface
//!
//! Common surface of the classic and structured sessions, so one driver can
//! run either variant in a module slot.

use bytes::Bytes;
use std::fmt;

use crate::afhds2::protocol::FirmwareTarget;
use crate::afhds3::protocol::{ModuleState, VersionInfo};
use crate::error::Result;
use crate::model::Model;
use crate::telemetry::SensorSink;

/// Coarse link status for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Configuring the module or waiting for it to come up
    Initializing,
    /// Bind in progress
    Binding,
    /// Range test in progress
    RangeTesting,
    /// Channel data is streaming
    Connected,
    /// Firmware update pass-through active
    Updating,
    /// Module is up but nothing is being sent
    Idle,
}

/// Notifications a session raises for its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A bind completed; the classic protocol reports the new receiver ID
    Bound { rx_id: Option<[u8; 4]> },
    /// A command went unanswered or the module reported failure
    CommandFailed { command: u8 },
    /// Structured module changed state
    ModuleStateChanged { from: ModuleState, to: ModuleState },
    /// Version information arrived
    VersionReceived,
}

/// Firmware or module version as reported by the module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleVersion {
    /// Classic version answer, payload kept opaque
    Firmware { target: FirmwareTarget, info: Vec<u8> },
    /// Structured `MODULE_VERSION` fields
    Module(VersionInfo),
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firmware { target, info } => {
                write!(f, "{:?} firmware", target)?;
                for byte in info {
                    write!(f, " {:02X}", byte)?;
                }
                Ok(())
            }
            Self::Module(v) => write!(
                f,
                "product {:08X}, hardware {:08X}, bootloader {:08X}, firmware {:08X}, rf {:08X}",
                v.product_number,
                v.hardware_version,
                v.bootloader_version,
                v.firmware_version,
                v.rf_version
            ),
        }
    }
}

/// A protocol session bound to one module slot.
///
/// All methods run in the tick context; none of them block.
pub trait LinkSession {
    /// Produces the frame due on this tick, if any.
    fn tick(&mut self, model: &dyn Model) -> Option<Bytes>;

    /// Feeds one received wire byte.
    fn on_byte(&mut self, byte: u8, model: &mut dyn Model, sink: &mut dyn SensorSink);

    /// Starts binding a new receiver.
    fn start_bind(&mut self) -> Result<()>;

    /// Starts a reduced-power range test.
    fn start_range_test(&mut self) -> Result<()>;

    /// Abandons any bind, range test or pending command and restarts.
    fn cancel(&mut self);

    /// Restarts the session. The bound identity is kept.
    fn reset(&mut self);

    /// Drops any partially received frame after input bytes were lost.
    fn discard_partial(&mut self);

    fn connection_state(&self) -> ConnectionState;

    fn module_version(&self) -> Option<ModuleVersion>;

    /// Drains the events raised since the last call.
    fn take_events(&mut self) -> Vec<LinkEvent>;
}
