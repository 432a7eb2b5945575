//! # Structured Link Session
//!
//! Request/response state machine for the structured (AFHDS3) module
//! protocol.
//!
//! ## Outbound Priority
//!
//! On every tick the session sends at most one frame, chosen in order:
//!
//! 1. a resend of the outstanding request once its response timed out
//! 2. the oldest [`CommandQueue`] entry
//! 3. `MODULE_SET_CONFIG` when a configuration sync is pending
//! 4. a `MODULE_READY` query while the module is not ready
//! 5. channel data while the module is ready
//! 6. a `MODULE_STATE` poll every [`STATE_POLL_TICKS`] idle ticks
//!
//! ## Start-up
//!
//! ```text
//! MODULE_READY (0x02) -> MODULE_VERSION, MODULE_POWER_STATUS
//!                     -> MODULE_SET_CONFIG -> MODULE_MODE RUN -> Ready
//! ```

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::frame::{FrameData, StructuredFrame};
use super::protocol::*;
use super::queue::{CommandQueue, QueueEntry, QUEUE_CAPACITY};
use crate::channels::ChannelEncoder;
use crate::codec::slip::FrameDecoder;
use crate::codec::FrameCounter;
use crate::config::ModuleConfig;
use crate::error::{LinkError, Result};
use crate::link::{ConnectionState, LinkEvent, LinkSession, ModuleVersion};
use crate::model::Model;
use crate::telemetry::{self, SensorSink};

/// Progress of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Unknown,
    SendingCommand,
    AwaitingResponse,
    Idle,
}

/// Request waiting for its response
#[derive(Debug, Clone)]
struct Pending {
    command: Command,
    frame: Bytes,
    attempts: u16,
    waited: u32,
    /// Mode carried by a `MODULE_MODE` request
    mode: Option<ModuleMode>,
}

/// Structured (AFHDS3) link session for one module slot.
#[derive(Debug)]
pub struct StructuredSession {
    config: ModuleConfig,
    op_state: OperationState,
    module_state: ModuleState,
    /// Last sync state reported while running
    link_state: Option<ModuleState>,
    counter: FrameCounter,
    decoder: FrameDecoder,
    queue: CommandQueue,
    pending: Option<Pending>,
    timeout_ticks: u32,
    repeat_limit: u16,
    encoder: ChannelEncoder,
    config_sync_pending: bool,
    idle_ticks: u32,
    version: Option<VersionInfo>,
    power_source: Option<PowerSource>,
    module_settings: Option<ModuleSettings>,
    events: Vec<LinkEvent>,
}

/// Result of an acknowledgement; a bare ack counts as success.
fn ack_result(data: &FrameData) -> CmdResult {
    data.byte().map_or(CmdResult::Success, CmdResult::from_u8)
}

impl StructuredSession {
    /// Creates a session that starts by probing the module.
    #[must_use]
    pub fn new(config: &ModuleConfig) -> Self {
        Self {
            config: config.clone(),
            op_state: OperationState::Unknown,
            module_state: ModuleState::NotReady,
            link_state: None,
            counter: FrameCounter::new(),
            decoder: FrameDecoder::new(),
            queue: CommandQueue::new(),
            pending: None,
            timeout_ticks: config.ticks_for(config.response_timeout_ms),
            repeat_limit: config.retry_count.max(1),
            encoder: ChannelEncoder::new(config.channels_start, config.channel_count),
            config_sync_pending: false,
            idle_ticks: 0,
            version: None,
            power_source: None,
            module_settings: None,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn module_state(&self) -> ModuleState {
        self.module_state
    }

    #[must_use]
    pub fn operation_state(&self) -> OperationState {
        self.op_state
    }

    /// Receiver link state reported while running
    #[must_use]
    pub fn link_state(&self) -> Option<ModuleState> {
        self.link_state
    }

    #[must_use]
    pub fn power_source(&self) -> Option<PowerSource> {
        self.power_source
    }

    /// Configuration last read back with `MODULE_GET_CONFIG`
    #[must_use]
    pub fn module_settings(&self) -> Option<&ModuleSettings> {
        self.module_settings.as_ref()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pushes the configuration again, e.g. after a model change.
    pub fn sync_settings(&mut self) {
        self.config_sync_pending = true;
    }

    /// Asks the module for its current configuration.
    pub fn request_module_config(&mut self) -> Result<()> {
        self.queue
            .enqueue(Command::ModuleGetConfig, FrameType::RequestGetData, None)
    }

    /// Puts the module into standby.
    pub fn stop(&mut self) -> Result<()> {
        self.enqueue_mode(ModuleMode::Standby)
    }

    /// Switches the module into receiver firmware update mode.
    pub fn start_rx_update(&mut self) -> Result<()> {
        self.enqueue_mode(ModuleMode::RxUpdate)
    }

    fn enqueue_mode(&mut self, mode: ModuleMode) -> Result<()> {
        self.queue.enqueue(
            Command::ModuleMode,
            FrameType::RequestSetExpectData,
            Some(mode as u8),
        )
    }

    fn set_module_state(&mut self, next: ModuleState) {
        if next != self.module_state {
            debug!("Module state {:?} -> {:?}", self.module_state, next);
            self.events.push(LinkEvent::ModuleStateChanged {
                from: self.module_state,
                to: next,
            });
            self.module_state = next;
            self.idle_ticks = 0;
        }
    }

    /// Frames and records a request. Requests that expect a response stay
    /// outstanding until answered or abandoned.
    fn send(
        &mut self,
        frame_type: FrameType,
        command: Command,
        data: FrameData,
        frame_number: Option<u8>,
    ) -> Bytes {
        self.op_state = OperationState::SendingCommand;

        let mode = match (command, &data) {
            (Command::ModuleMode, FrameData::Byte(value)) => ModuleMode::from_u8(*value),
            _ => None,
        };
        let number = frame_number.unwrap_or_else(|| self.counter.next_number());
        let frame = StructuredFrame::new(number, frame_type, command, data).encode();

        if frame_type.expects_response() {
            self.pending = Some(Pending {
                command,
                frame: frame.clone(),
                attempts: 1,
                waited: 0,
                mode,
            });
            self.op_state = OperationState::AwaitingResponse;
        } else {
            self.op_state = OperationState::Idle;
        }
        frame
    }

    fn send_entry(&mut self, entry: QueueEntry) -> Bytes {
        let data = entry.payload.map_or(FrameData::Empty, FrameData::Byte);
        let number = entry.uses_frame_number.then_some(entry.frame_number);
        debug!("Sending queued {:?} ({:?})", entry.command, entry.frame_type);
        self.send(entry.frame_type, entry.command, data, number)
    }

    fn send_channels(&mut self, model: &dyn Model) -> Bytes {
        let channels = self.encoder.encode(model);
        if channels.is_failsafe() {
            trace!("Sending failsafe frame");
        }
        self.send(
            FrameType::RequestSetNoResp,
            Command::ChannelsFailsafeData,
            FrameData::Channels(channels),
            None,
        )
    }

    /// Drops the outstanding request after its last attempt.
    fn abandon(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.op_state = OperationState::Idle;

        // An absent module is expected; keep probing quietly
        if pending.command == Command::ModuleReady {
            trace!("No answer to MODULE_READY");
            return;
        }

        warn!(
            "{:?} unanswered after {} attempts",
            pending.command, pending.attempts
        );
        self.events.push(LinkEvent::CommandFailed {
            command: pending.command as u8,
        });
    }

    fn report_failure(&mut self, command: u8) {
        warn!("Module rejected command 0x{:02X}", command);
        self.events.push(LinkEvent::CommandFailed { command });
    }

    fn handle_frame(&mut self, frame: StructuredFrame, sink: &mut dyn SensorSink) {
        let mut mode_in_flight = None;

        if frame.frame_type.is_response() {
            match &self.pending {
                Some(pending) if pending.command == frame.command => {
                    mode_in_flight = pending.mode;
                    self.pending = None;
                    self.op_state = OperationState::Idle;
                }
                _ => {
                    debug!(
                        "Dropping frame: {}",
                        LinkError::Correlation(format!("unexpected {:?} response", frame.command))
                    );
                    return;
                }
            }
        }

        match frame.command {
            Command::ModuleReady => self.on_module_ready(&frame.data),

            Command::ModuleSetConfig => {
                if ack_result(&frame.data) == CmdResult::Success {
                    debug!("Module configuration accepted");
                    if let Err(e) = self.enqueue_mode(ModuleMode::Run) {
                        warn!("Cannot request run mode: {}", e);
                    }
                } else {
                    self.report_failure(Command::ModuleSetConfig as u8);
                }
            }

            Command::ModuleMode => {
                if ack_result(&frame.data) == CmdResult::Success {
                    if let Some(mode) = mode_in_flight {
                        info!("Module mode {:?}", mode);
                        self.set_module_state(mode.resulting_state());
                    }
                } else {
                    self.report_failure(Command::ModuleMode as u8);
                }
            }

            Command::ModuleState => self.on_state_report(&frame.data),

            Command::CommandResult => {
                if let FrameData::CommandResult(result) = &frame.data {
                    if result.result == CmdResult::Failure {
                        self.report_failure(result.command as u8);
                    } else {
                        debug!("Command 0x{:04X} succeeded", result.command);
                    }
                }
            }

            Command::TelemetryData => {
                telemetry::dispatch_structured(&frame.data.to_bytes(), sink);
            }

            Command::ModuleVersion => {
                if let FrameData::Version(version) = frame.data {
                    info!(
                        "Module product 0x{:08X}, firmware 0x{:08X}, RF 0x{:08X}",
                        version.product_number, version.firmware_version, version.rf_version
                    );
                    self.version = Some(version);
                    self.events.push(LinkEvent::VersionReceived);
                }
            }

            Command::ModulePowerStatus => {
                self.power_source = frame.data.byte().and_then(PowerSource::from_u8);
                debug!("Module power source {:?}", self.power_source);
            }

            Command::ModuleGetConfig => {
                if let FrameData::Settings(settings) = &frame.data {
                    self.module_settings = Some(settings.clone());
                }
            }

            other => debug!("Ignoring {:?}", other),
        }

        if frame.frame_type.expects_response() {
            if let Err(e) = self.queue.enqueue_ack(frame.command, frame.frame_number) {
                warn!("Cannot acknowledge {:?}: {}", frame.command, e);
            }
        }
    }

    fn on_module_ready(&mut self, data: &FrameData) {
        if data.byte() != Some(MODULE_STATUS_READY) {
            self.set_module_state(ModuleState::NotReady);
            return;
        }
        if self.module_state != ModuleState::NotReady {
            return;
        }

        info!("Module ready");
        self.set_module_state(ModuleState::Standby);
        for command in [Command::ModuleVersion, Command::ModulePowerStatus] {
            if let Err(e) = self.queue.enqueue(command, FrameType::RequestGetData, None) {
                warn!("Cannot request {:?}: {}", command, e);
            }
        }
        self.config_sync_pending = true;
    }

    fn on_state_report(&mut self, data: &FrameData) {
        let Some(state) = data.byte().and_then(ModuleState::from_u8) else {
            debug!("Unknown module state {:?}", data);
            return;
        };

        if self.module_state == ModuleState::Binding
            && (state.is_sync() || state == ModuleState::Standby)
        {
            info!("Bind complete");
            self.events.push(LinkEvent::Bound { rx_id: None });
        }

        if state.is_sync() {
            self.link_state = Some(state);
            self.set_module_state(ModuleState::Ready);
        } else {
            self.set_module_state(state);
        }
    }
}

impl LinkSession for StructuredSession {
    fn tick(&mut self, model: &dyn Model) -> Option<Bytes> {
        if let Some(pending) = self.pending.as_mut() {
            pending.waited += 1;
            if pending.waited < self.timeout_ticks {
                return None;
            }
            if pending.attempts < self.repeat_limit {
                pending.attempts += 1;
                pending.waited = 0;
                trace!("Resending {:?} (attempt {})", pending.command, pending.attempts);
                return Some(pending.frame.clone());
            }
            self.abandon();
        }

        if let Some(entry) = self.queue.pop() {
            return Some(self.send_entry(entry));
        }

        if self.config_sync_pending && self.module_state != ModuleState::NotReady {
            self.config_sync_pending = false;
            let settings = ModuleSettings::from_config(&self.config, model);
            debug!("Syncing module configuration: {:?}", settings);
            return Some(self.send(
                FrameType::RequestSetExpectData,
                Command::ModuleSetConfig,
                FrameData::Settings(settings),
                None,
            ));
        }

        match self.module_state {
            ModuleState::NotReady => Some(self.send(
                FrameType::RequestGetData,
                Command::ModuleReady,
                FrameData::Empty,
                None,
            )),
            ModuleState::Ready => Some(self.send_channels(model)),
            _ => {
                self.idle_ticks += 1;
                if self.idle_ticks < STATE_POLL_TICKS {
                    return None;
                }
                self.idle_ticks = 0;
                Some(self.send(
                    FrameType::RequestGetData,
                    Command::ModuleState,
                    FrameData::Empty,
                    None,
                ))
            }
        }
    }

    fn on_byte(&mut self, byte: u8, _model: &mut dyn Model, sink: &mut dyn SensorSink) {
        let frame = match self.decoder.push(byte) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!("Structured receive error: {}", e);
                return;
            }
            None => return,
        };

        match StructuredFrame::parse(&frame) {
            Ok(frame) => self.handle_frame(frame, sink),
            Err(e) => debug!("Dropping structured frame: {}", e),
        }
    }

    fn start_bind(&mut self) -> Result<()> {
        if self.queue.len() + 2 > QUEUE_CAPACITY - 1 {
            return Err(LinkError::QueueFull {
                capacity: QUEUE_CAPACITY - 1,
            });
        }
        info!("Starting structured bind");
        self.enqueue_mode(ModuleMode::Standby)?;
        self.enqueue_mode(ModuleMode::Bind)
    }

    fn start_range_test(&mut self) -> Result<()> {
        Err(LinkError::Unsupported("range test on the structured protocol"))
    }

    fn cancel(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        debug!("Structured session reset");
        self.op_state = OperationState::Unknown;
        self.module_state = ModuleState::NotReady;
        self.link_state = None;
        self.counter = FrameCounter::new();
        self.decoder.reset();
        self.queue.clear();
        self.pending = None;
        self.encoder.reset();
        self.config_sync_pending = false;
        self.idle_ticks = 0;
    }

    fn discard_partial(&mut self) {
        self.decoder.resync();
    }

    fn connection_state(&self) -> ConnectionState {
        match self.module_state {
            ModuleState::Ready => ConnectionState::Connected,
            ModuleState::Binding => ConnectionState::Binding,
            ModuleState::RfTesting => ConnectionState::RangeTesting,
            ModuleState::Standby => ConnectionState::Idle,
            state if state.is_updating() => ConnectionState::Updating,
            _ => ConnectionState::Initializing,
        }
    }

    fn module_version(&self) -> Option<ModuleVersion> {
        self.version.map(ModuleVersion::Module)
    }

    fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }
}
