//! # Module Driver
//!
//! Runs one protocol session against one module slot: inbound bytes are
//! parked in a [`ByteRing`] from the receive path and drained into the
//! session at the start of every tick, then the frame due on that tick is
//! written to the [`Transport`].

use tracing::{debug, info};

use crate::afhds2::ClassicSession;
use crate::afhds3::StructuredSession;
use crate::config::{ModuleConfig, Protocol};
use crate::error::Result;
use crate::link::{ConnectionState, LinkEvent, LinkSession, ModuleVersion};
use crate::model::Model;
use crate::serial::{ByteRing, Transport};
use crate::telemetry::SensorSink;

/// One module slot
pub struct ModuleDriver<T: Transport> {
    session: Box<dyn LinkSession + Send>,
    transport: T,
    rx: ByteRing,
    /// Receive bytes were lost since the last tick
    resync: bool,
}

impl<T: Transport> std::fmt::Debug for ModuleDriver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDriver")
            .field("state", &self.session.connection_state())
            .field("pending_rx", &self.rx.len())
            .field("rx_overflows", &self.rx.overflows())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ModuleDriver<T> {
    /// Wraps an existing session.
    pub fn new(session: Box<dyn LinkSession + Send>, transport: T) -> Self {
        Self {
            session,
            transport,
            rx: ByteRing::new(),
            resync: false,
        }
    }

    /// Builds the session variant the configuration selects.
    pub fn for_config(config: &ModuleConfig, transport: T) -> Self {
        let session: Box<dyn LinkSession + Send> = match config.protocol {
            Protocol::Afhds2 => Box::new(ClassicSession::new(config)),
            Protocol::Afhds3 => Box::new(StructuredSession::new(config)),
        };
        info!("Module driver using {:?} protocol", config.protocol);
        Self::new(session, transport)
    }

    /// Receive path: queues one byte for the next tick.
    pub fn on_byte_received(&mut self, byte: u8) {
        if !self.rx.push(byte) {
            self.resync = true;
        }
    }

    /// Receive path: queues a chunk of bytes for the next tick.
    pub fn on_bytes_received(&mut self, data: &[u8]) {
        let overflows = self.rx.overflows();
        self.rx.push_slice(data);
        if self.rx.overflows() != overflows {
            self.resync = true;
        }
    }

    /// Drains received bytes into the session, then sends the frame due.
    ///
    /// Returns `true` when a frame was handed to the transport.
    pub fn tick(&mut self, model: &mut dyn Model, sink: &mut dyn SensorSink) -> bool {
        if std::mem::take(&mut self.resync) {
            debug!("Receive bytes lost, resynchronizing decoder");
            self.session.discard_partial();
        }
        while let Some(byte) = self.rx.pop() {
            self.session.on_byte(byte, model, sink);
        }

        match self.session.tick(model) {
            Some(frame) => {
                self.transport.send_buffer(&frame);
                true
            }
            None => false,
        }
    }

    pub fn start_bind(&mut self) -> Result<()> {
        self.session.start_bind()
    }

    pub fn start_range_test(&mut self) -> Result<()> {
        self.session.start_range_test()
    }

    /// Abandons any bind, range test or pending command.
    pub fn cancel(&mut self) {
        debug!("Cancelling module activity");
        self.rx.clear();
        self.resync = false;
        self.session.cancel();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    pub fn module_version(&self) -> Option<ModuleVersion> {
        self.session.module_version()
    }

    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        self.session.take_events()
    }

    pub fn session(&self) -> &dyn LinkSession {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut dyn LinkSession {
        self.session.as_mut()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
