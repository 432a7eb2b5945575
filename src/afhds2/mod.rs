//! # Classic Protocol (AFHDS2)
//!
//! Byte-stuffed, sum-checksummed module link. The session walks the module
//! through its configuration requests and then streams channel data on
//! every tick.

pub mod protocol;
pub mod session;

pub use protocol::{Command, FirmwareTarget, FrameType, Response};
pub use session::{transition, ClassicSession, ClassicState, Effect, LinkMode, Transition};
