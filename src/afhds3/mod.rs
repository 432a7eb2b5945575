//! # Structured Protocol (AFHDS3)
//!
//! Request/response module link with CRC-16 protected frames, a command
//! queue and per-request retries.
//!
//! This module handles:
//! - Frame layout and typed payloads ([`frame`])
//! - Commands, module states and payload codecs ([`protocol`])
//! - The outbound command FIFO ([`queue`])
//! - The session state machine ([`session`])

pub mod frame;
pub mod protocol;
pub mod queue;
pub mod session;

pub use frame::{FrameData, StructuredFrame};
pub use protocol::{Command, FrameType, ModuleMode, ModuleState, VersionInfo};
pub use queue::CommandQueue;
pub use session::{OperationState, StructuredSession};
