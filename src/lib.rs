//! # FlySky Link Library
//!
//! Host-side engine for the serial link to FlySky RF modules.
//!
//! This library speaks both module protocols: the classic byte-stuffed
//! AFHDS2 exchange and the structured, CRC-protected AFHDS3 exchange. It
//! turns model channel values into channel frames, tracks bind and range
//! test sequences, and decodes receiver telemetry.
//!
//! A [`driver::ModuleDriver`] ties one session to a [`serial::Transport`]
//! and is ticked at a fixed period from the host loop.

pub mod afhds2;
pub mod afhds3;
pub mod channels;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod hall;
pub mod link;
pub mod model;
pub mod serial;
pub mod telemetry;
