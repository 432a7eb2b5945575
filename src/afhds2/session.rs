//! # Classic Link Session
//!
//! State machine that configures a classic (AFHDS2) RF module and then
//! streams channel data to it.
//!
//! ## Start-up Sequence
//!
//! ```text
//! Init -> SetReceiverId -> GetReceiverConfig -> SetTxPower
//!      -> SetRxPwmPpm -> SetRxIbusSbus -> SetRxFrequency -> SendChannels
//! ```
//!
//! While the session is below `SendChannels` it sends the request for the
//! current state once every [`TIMEOUT_TICKS`] ticks and advances when the
//! module answers. In `SendChannels` every tick carries a channel frame.
//!
//! Inbound frames are decided by [`transition`], a pure function returning
//! the next state and a list of [`Effect`]s that the session applies.

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::protocol::*;
use crate::channels::ChannelEncoder;
use crate::codec::slip::{verify_checksum, FrameDecoder, FrameWriter};
use crate::codec::FrameCounter;
use crate::config::{ModuleConfig, PulseMode, SerialMode};
use crate::error::{LinkError, Result};
use crate::link::{ConnectionState, LinkEvent, LinkSession, ModuleVersion};
use crate::model::Model;
use crate::telemetry::{self, SensorSink};

/// Classic session states, in start-up order.
///
/// Ordering matters: every state below [`ClassicState::SendChannels`] is
/// driven by the request timeout, and states from [`ClassicState::Idle`] up
/// fall back to channel streaming on any unrelated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassicState {
    Init,
    Bind,
    SetReceiverId,
    GetReceiverConfig,
    SetTxPower,
    SetRxPwmPpm,
    SetRxIbusSbus,
    SetRxFrequency,
    UpdateRfProtocol,
    UpdateRxFirmware,
    UpdateRfFirmware,
    GetRxVersionInfo,
    GetRfVersionInfo,
    SetRangeTest,
    RangeTestRunning,
    Idle,
    SendChannels,
}

/// What the transmitter is currently asking of the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Normal,
    Bind,
    RangeCheck,
}

/// Session state visible to [`transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub state: ClassicState,
    pub mode: LinkMode,
    /// State to resume after a version request
    pub return_state: ClassicState,
}

/// Side effects requested by a transition, applied in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Restart from `Init`
    Reset,
    /// Leave bind mode
    EndBinding,
    /// Store a newly bound receiver ID in the model
    PersistBoundId([u8; 4]),
    /// Forward the response payload to the telemetry sink
    DispatchTelemetry,
    /// Keep version information
    StoreVersion { target: FirmwareTarget, info: Vec<u8> },
    /// Send the current state's frame on the next tick
    PrimeTimeout,
    /// Module entered RF firmware update mode
    FirmwareUpdateStarted,
}

/// Outcome of one inbound frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transition {
    pub next: Option<ClassicState>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ClassicState) -> Self {
        Self {
            next: Some(next),
            effects: Vec::new(),
        }
    }

    fn effects(effects: Vec<Effect>) -> Self {
        Self { next: None, effects }
    }
}

/// Decides how a correlated, checksum-valid frame moves the session.
///
/// # Arguments
///
/// * `ctx` - Current state, mode and version-request return state
/// * `response` - Parsed inbound frame
///
/// # Returns
///
/// * `Transition` - Next state (if it changes) and the effects to apply
pub fn transition(ctx: &TransitionContext, response: &Response) -> Transition {
    let may_stream = ctx.mode == LinkMode::Normal && ctx.state >= ClassicState::Idle;

    match response.command() {
        Some(Command::RfInit) => {
            if response.first_param() == RF_READY {
                if ctx.mode == LinkMode::Bind {
                    Transition::to(ClassicState::Bind)
                } else {
                    Transition::to(ClassicState::SetReceiverId)
                }
            } else {
                Transition::effects(vec![Effect::Reset])
            }
        }

        Some(Command::Bind) => {
            if response.frame_type != FrameType::Answer {
                return Transition::to(ClassicState::Idle);
            }
            match response.payload.get(..4) {
                Some(id) => Transition::effects(vec![
                    Effect::EndBinding,
                    Effect::PersistBoundId([id[0], id[1], id[2], id[3]]),
                    Effect::Reset,
                ]),
                None => Transition::default(),
            }
        }

        Some(Command::RfGetConfig) => Transition {
            next: Some(ClassicState::GetReceiverConfig),
            effects: vec![Effect::PrimeTimeout],
        },

        Some(Command::RxSensorData) => Transition {
            next: may_stream.then_some(ClassicState::SendChannels),
            effects: vec![Effect::DispatchTelemetry],
        },

        Some(Command::SetReceiverId) => Transition::to(ClassicState::GetReceiverConfig),

        Some(Command::TestRange) => {
            if ctx.mode == LinkMode::RangeCheck {
                Transition::to(ClassicState::RangeTestRunning)
            } else {
                Transition::effects(vec![Effect::Reset])
            }
        }

        Some(Command::SetTxPower) => Transition::to(ClassicState::SetRxPwmPpm),
        Some(Command::SetRxPwmPpm) => Transition::to(ClassicState::SetRxIbusSbus),
        Some(Command::SetRxIbusSbus) => Transition::to(ClassicState::SetRxFrequency),
        Some(Command::SetRxServoFreq) => Transition::to(ClassicState::SendChannels),

        Some(Command::SetRfProtocol) => Transition::effects(vec![Effect::Reset]),

        Some(Command::UpdateRfFirmware) => Transition {
            next: Some(ClassicState::Idle),
            effects: vec![Effect::FirmwareUpdateStarted],
        },

        Some(Command::GetVersionInfo) => {
            let target = if ctx.state == ClassicState::GetRfVersionInfo {
                FirmwareTarget::RfModule
            } else {
                FirmwareTarget::Receiver
            };
            let effects = match response.payload.get(1..) {
                Some(info) if !info.is_empty() => vec![Effect::StoreVersion {
                    target,
                    info: info.to_vec(),
                }],
                _ => Vec::new(),
            };
            let next = match ctx.return_state {
                ClassicState::GetRxVersionInfo | ClassicState::GetRfVersionInfo => {
                    ClassicState::Init
                }
                other => other,
            };
            Transition {
                next: Some(next),
                effects,
            }
        }

        _ => Transition {
            next: may_stream.then_some(ClassicState::SendChannels),
            effects: Vec::new(),
        },
    }
}

/// Classic (AFHDS2) link session for one module slot.
#[derive(Debug)]
pub struct ClassicSession {
    state: ClassicState,
    mode: LinkMode,
    return_state: ClassicState,
    timeout: u32,
    counter: FrameCounter,
    last_sent: Option<u8>,
    decoder: FrameDecoder,
    encoder: ChannelEncoder,
    high_power: bool,
    pulse_mode: PulseMode,
    serial_mode: SerialMode,
    rf_protocol: u8,
    firmware_update: bool,
    version: Option<ModuleVersion>,
    events: Vec<LinkEvent>,
}

impl ClassicSession {
    /// Creates a session in `Init`.
    #[must_use]
    pub fn new(config: &ModuleConfig) -> Self {
        Self {
            state: ClassicState::Init,
            mode: LinkMode::Normal,
            return_state: ClassicState::Init,
            timeout: 0,
            counter: FrameCounter::new(),
            last_sent: None,
            decoder: FrameDecoder::new(),
            encoder: ChannelEncoder::new(config.channels_start, config.channel_count),
            high_power: config.high_power,
            pulse_mode: config.pulse_mode,
            serial_mode: config.serial_mode,
            rf_protocol: config.rf_protocol,
            firmware_update: false,
            version: None,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ClassicState {
        self.state
    }

    #[must_use]
    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Frame number of the most recent outbound frame
    #[must_use]
    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }

    #[must_use]
    pub fn is_firmware_updating(&self) -> bool {
        self.firmware_update
    }

    /// Asks the module for receiver or RF firmware version, then resumes
    /// the current state.
    pub fn request_version(&mut self, target: FirmwareTarget) {
        self.return_state = self.state;
        self.set_state(match target {
            FirmwareTarget::Receiver => ClassicState::GetRxVersionInfo,
            FirmwareTarget::RfModule => ClassicState::GetRfVersionInfo,
        });
    }

    /// Switches the RF protocol subtype (0: AFHDS1, 1: AFHDS2, 2: AFHDS2A).
    pub fn set_rf_protocol(&mut self, subtype: u8) {
        self.rf_protocol = subtype;
        self.set_state(ClassicState::UpdateRfProtocol);
    }

    /// Puts the receiver or the RF module into firmware update mode.
    pub fn start_firmware_update(&mut self, target: FirmwareTarget) {
        self.set_state(match target {
            FirmwareTarget::Receiver => ClassicState::UpdateRxFirmware,
            FirmwareTarget::RfModule => ClassicState::UpdateRfFirmware,
        });
    }

    /// Ends a firmware update pass-through and reconfigures the module.
    pub fn firmware_update_finished(&mut self) {
        self.firmware_update = false;
        self.reset();
    }

    /// Ends a running range test; the stop request goes out on the next
    /// timeout.
    pub fn stop_range_test(&mut self) {
        if self.mode == LinkMode::RangeCheck {
            self.mode = LinkMode::Normal;
        }
    }

    fn context(&self) -> TransitionContext {
        TransitionContext {
            state: self.state,
            mode: self.mode,
            return_state: self.return_state,
        }
    }

    fn set_state(&mut self, next: ClassicState) {
        if next != self.state {
            debug!("Classic state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Opens a frame carrying the next frame number.
    fn open(&mut self, frame_type: FrameType, command: Command) -> FrameWriter {
        let number = self.counter.next_number();
        self.last_sent = Some(number);
        frame_header(number, frame_type, command)
    }

    fn request(&mut self, command: Command, payload: &[u8]) -> Bytes {
        let mut writer = self.open(FrameType::RequestAck, command);
        writer.put_slice(payload);
        writer.finish_checksum()
    }

    fn tx_power(&self) -> u8 {
        if self.mode == LinkMode::RangeCheck {
            TX_POWER_RANGE_CHECK
        } else if self.high_power {
            TX_POWER_HIGH
        } else {
            TX_POWER_LOW
        }
    }

    /// Builds the request for the current configuration state.
    fn command_frame(&mut self, model: &dyn Model) -> Option<Bytes> {
        let identity = model.bound_identity();
        let freq = identity.sanitized_freq().to_le_bytes();
        let pulse = pulse_mode_byte(self.pulse_mode);
        let serial = serial_mode_byte(self.serial_mode);

        let frame = match self.state {
            ClassicState::Init => self.request(Command::RfInit, &[]),
            ClassicState::Bind => {
                let mut payload = vec![BIND_POWER_LOW];
                payload.extend_from_slice(&TX_ID);
                self.request(Command::Bind, &payload)
            }
            ClassicState::SetReceiverId => self.request(Command::SetReceiverId, &identity.rx_id),
            ClassicState::GetReceiverConfig => {
                let mut writer = self.open(FrameType::Answer, Command::RfGetConfig);
                writer.put_slice(&[pulse, serial, freq[0], freq[1]]);
                self.set_state(ClassicState::SetTxPower);
                writer.finish_checksum()
            }
            ClassicState::SetTxPower => {
                let power = self.tx_power();
                self.request(Command::SetTxPower, &[power])
            }
            ClassicState::SetRxPwmPpm => self.request(Command::SetRxPwmPpm, &[pulse]),
            ClassicState::SetRxIbusSbus => self.request(Command::SetRxIbusSbus, &[serial]),
            ClassicState::SetRxFrequency => self.request(Command::SetRxServoFreq, &freq),
            ClassicState::UpdateRfProtocol => {
                let subtype = self.rf_protocol;
                self.request(Command::SetRfProtocol, &[subtype])
            }
            ClassicState::UpdateRxFirmware => self.request(Command::UpdateRxFirmware, &[]),
            ClassicState::UpdateRfFirmware => self.request(Command::UpdateRfFirmware, &[]),
            ClassicState::GetRxVersionInfo => {
                self.request(Command::GetVersionInfo, &[FirmwareTarget::Receiver as u8])
            }
            ClassicState::GetRfVersionInfo => {
                self.request(Command::GetVersionInfo, &[FirmwareTarget::RfModule as u8])
            }
            ClassicState::SetRangeTest => {
                let start = if self.mode == LinkMode::RangeCheck {
                    RANGE_TEST_START
                } else {
                    RANGE_TEST_STOP
                };
                self.request(Command::TestRange, &[start])
            }
            ClassicState::RangeTestRunning => {
                if self.mode != LinkMode::RangeCheck {
                    self.set_state(ClassicState::SetRangeTest);
                }
                return None;
            }
            ClassicState::Idle | ClassicState::SendChannels => return None,
        };

        Some(frame)
    }

    fn channel_frame(&mut self, model: &dyn Model) -> Bytes {
        if self.mode == LinkMode::Bind {
            self.mode = LinkMode::Normal;
        }

        let channels = self.encoder.encode(model);
        if channels.is_failsafe() {
            trace!("Sending failsafe frame");
        }

        let mut writer = self.open(FrameType::RequestNack, Command::SendChannelData);
        channels.write_to(&mut writer);
        writer.finish_checksum()
    }

    fn handle_frame(&mut self, frame: &[u8], model: &mut dyn Model, sink: &mut dyn SensorSink) {
        let response = match verify_checksum(frame).and_then(Response::parse) {
            Ok(response) => response,
            Err(e) => {
                debug!("Dropping classic frame: {}", e);
                return;
            }
        };

        if let Err(e) = self.correlate(&response) {
            debug!("Dropping classic frame: {}", e);
            return;
        }

        let outcome = transition(&self.context(), &response);
        for effect in outcome.effects {
            self.apply(effect, &response, model, sink);
        }
        if let Some(next) = outcome.next {
            self.set_state(next);
        }
    }

    /// Answers must match the last request, except while binding. A module
    /// request sets the number our answer will carry.
    fn correlate(&mut self, response: &Response) -> Result<()> {
        match response.frame_type {
            FrameType::Answer if self.mode != LinkMode::Bind => {
                if Some(response.frame_number) != self.last_sent {
                    return Err(LinkError::Correlation(format!(
                        "answer #{} to command 0x{:02X}, last sent {:?}",
                        response.frame_number, response.command, self.last_sent
                    )));
                }
            }
            FrameType::RequestAck => self.counter.set(response.frame_number),
            _ => {}
        }
        Ok(())
    }

    fn apply(
        &mut self,
        effect: Effect,
        response: &Response,
        model: &mut dyn Model,
        sink: &mut dyn SensorSink,
    ) {
        match effect {
            Effect::Reset => self.reset(),
            Effect::EndBinding => self.mode = LinkMode::Normal,
            Effect::PersistBoundId(rx_id) => {
                info!("Bound receiver {:02X?}", rx_id);
                model.persist_bound_id(rx_id);
                self.events.push(LinkEvent::Bound { rx_id: Some(rx_id) });
            }
            Effect::DispatchTelemetry => {
                telemetry::dispatch_classic(&response.payload, sink);
            }
            Effect::StoreVersion { target, info } => {
                info!("{:?} firmware version: {:02X?}", target, info);
                self.version = Some(ModuleVersion::Firmware { target, info });
                self.events.push(LinkEvent::VersionReceived);
            }
            Effect::PrimeTimeout => self.timeout = TIMEOUT_TICKS - 1,
            Effect::FirmwareUpdateStarted => {
                warn!("RF module entered firmware update mode");
                self.firmware_update = true;
            }
        }
    }
}

impl LinkSession for ClassicSession {
    fn tick(&mut self, model: &dyn Model) -> Option<Bytes> {
        if self.state == ClassicState::SendChannels {
            return Some(self.channel_frame(model));
        }

        self.timeout += 1;
        if self.timeout < TIMEOUT_TICKS {
            return None;
        }
        self.timeout = 0;

        let frame = self.command_frame(model);
        if let Some(frame) = &frame {
            trace!("Classic TX ({:?}): {:02X?}", self.state, &frame[..]);
        }
        frame
    }

    fn on_byte(&mut self, byte: u8, model: &mut dyn Model, sink: &mut dyn SensorSink) {
        match self.decoder.push(byte) {
            Some(Ok(frame)) => self.handle_frame(&frame, model, sink),
            Some(Err(e)) => debug!("Classic receive error: {}", e),
            None => {}
        }
    }

    fn start_bind(&mut self) -> Result<()> {
        info!("Starting classic bind");
        self.mode = LinkMode::Bind;
        self.reset();
        Ok(())
    }

    fn start_range_test(&mut self) -> Result<()> {
        info!("Starting classic range test");
        self.mode = LinkMode::RangeCheck;
        self.set_state(ClassicState::SetRangeTest);
        self.timeout = TIMEOUT_TICKS - 1;
        Ok(())
    }

    fn cancel(&mut self) {
        self.mode = LinkMode::Normal;
        self.reset();
    }

    fn reset(&mut self) {
        self.set_state(ClassicState::Init);
        self.timeout = 0;
        self.counter = FrameCounter::new();
        self.last_sent = None;
        self.decoder.reset();
    }

    fn discard_partial(&mut self) {
        self.decoder.resync();
    }

    fn connection_state(&self) -> ConnectionState {
        if self.firmware_update
            || matches!(
                self.state,
                ClassicState::UpdateRxFirmware | ClassicState::UpdateRfFirmware
            )
        {
            return ConnectionState::Updating;
        }

        match (self.mode, self.state) {
            (LinkMode::Bind, _) => ConnectionState::Binding,
            (LinkMode::RangeCheck, _)
            | (_, ClassicState::SetRangeTest | ClassicState::RangeTestRunning) => {
                ConnectionState::RangeTesting
            }
            (_, ClassicState::SendChannels) => ConnectionState::Connected,
            (_, ClassicState::Idle) => ConnectionState::Idle,
            _ => ConnectionState::Initializing,
        }
    }

    fn module_version(&self) -> Option<ModuleVersion> {
        self.version.clone()
    }

    fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::FailsafeMode;
    use crate::model::{BoundReceiverIdentity, ModelData};
    use crate::telemetry::{MockSensorSink, TelemetryRecord};

    const RX_ID: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    struct Harness {
        session: ClassicSession,
        model: ModelData,
        sink: Vec<TelemetryRecord>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(ModuleConfig::default())
        }

        fn with_config(config: ModuleConfig) -> Self {
            let identity = BoundReceiverIdentity {
                rx_id: RX_ID,
                servo_freq_hz: 333,
                protocol: 0,
            };
            Self {
                session: ClassicSession::new(&config),
                model: ModelData::new(config.channel_count, identity),
                sink: Vec::new(),
            }
        }

        /// Ticks until a frame comes out, returning its logical bytes.
        fn next_frame(&mut self, max_ticks: u32) -> Option<Vec<u8>> {
            for _ in 0..max_ticks {
                if let Some(wire) = self.session.tick(&self.model) {
                    return Some(decode(&wire));
                }
            }
            None
        }

        fn receive(&mut self, number: u8, frame_type: FrameType, command: u8, payload: &[u8]) {
            let mut writer = FrameWriter::begin();
            writer.put_slice(&[number, frame_type as u8, command]);
            writer.put_slice(payload);
            let wire = writer.finish_checksum();
            for &byte in wire.iter() {
                self.session.on_byte(byte, &mut self.model, &mut self.sink);
            }
        }

        /// Answers `frame` the way a healthy module would.
        fn answer(&mut self, frame: &[u8]) {
            let payload: &[u8] = if frame[2] == Command::RfInit as u8 {
                &[RF_READY]
            } else {
                &[]
            };
            self.receive(frame[0], FrameType::Answer, frame[2], payload);
        }

        fn bring_up(&mut self) {
            for _ in 0..16 {
                if self.session.state() == ClassicState::SendChannels {
                    return;
                }
                if let Some(frame) = self.next_frame(TIMEOUT_TICKS) {
                    if frame[1] == FrameType::RequestAck as u8 {
                        self.answer(&frame);
                    }
                }
            }
            assert_eq!(self.session.state(), ClassicState::SendChannels);
        }
    }

    fn decode(wire: &[u8]) -> Vec<u8> {
        let mut decoder = FrameDecoder::new();
        let frame = wire
            .iter()
            .find_map(|&b| decoder.push(b))
            .expect("no frame")
            .expect("bad frame");
        verify_checksum(&frame).expect("bad checksum").to_vec()
    }

    fn ctx(state: ClassicState, mode: LinkMode) -> TransitionContext {
        TransitionContext {
            state,
            mode,
            return_state: ClassicState::SendChannels,
        }
    }

    fn response(frame_type: FrameType, command: Command, payload: &[u8]) -> Response {
        Response {
            frame_number: 1,
            frame_type,
            command: command as u8,
            payload: payload.to_vec(),
        }
    }

    // ==================== Transition Tests ====================

    #[test]
    fn test_transition_rf_init_ready() {
        let r = response(FrameType::Answer, Command::RfInit, &[RF_READY]);
        assert_eq!(
            transition(&ctx(ClassicState::Init, LinkMode::Normal), &r).next,
            Some(ClassicState::SetReceiverId)
        );
        assert_eq!(
            transition(&ctx(ClassicState::Init, LinkMode::Bind), &r).next,
            Some(ClassicState::Bind)
        );
    }

    #[test]
    fn test_transition_rf_init_not_ready_resets() {
        let r = response(FrameType::Answer, Command::RfInit, &[0x00]);
        let t = transition(&ctx(ClassicState::Init, LinkMode::Normal), &r);
        assert_eq!(t.next, None);
        assert_eq!(t.effects, vec![Effect::Reset]);
    }

    #[test]
    fn test_transition_bind_answer() {
        let r = response(FrameType::Answer, Command::Bind, &[1, 2, 3, 4, 5, 6]);
        let t = transition(&ctx(ClassicState::Bind, LinkMode::Bind), &r);
        assert_eq!(
            t.effects,
            vec![
                Effect::EndBinding,
                Effect::PersistBoundId([1, 2, 3, 4]),
                Effect::Reset
            ]
        );
    }

    #[test]
    fn test_transition_bind_request_goes_idle() {
        let r = response(FrameType::RequestAck, Command::Bind, &[1, 2, 3, 4]);
        let t = transition(&ctx(ClassicState::Bind, LinkMode::Bind), &r);
        assert_eq!(t.next, Some(ClassicState::Idle));
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_transition_bind_answer_too_short() {
        let r = response(FrameType::Answer, Command::Bind, &[1, 2]);
        assert_eq!(
            transition(&ctx(ClassicState::Bind, LinkMode::Bind), &r),
            Transition::default()
        );
    }

    #[test]
    fn test_transition_configuration_chain() {
        let chain = [
            (Command::SetReceiverId, ClassicState::GetReceiverConfig),
            (Command::SetTxPower, ClassicState::SetRxPwmPpm),
            (Command::SetRxPwmPpm, ClassicState::SetRxIbusSbus),
            (Command::SetRxIbusSbus, ClassicState::SetRxFrequency),
            (Command::SetRxServoFreq, ClassicState::SendChannels),
        ];
        for (command, expected) in chain {
            let r = response(FrameType::Answer, command, &[]);
            assert_eq!(
                transition(&ctx(ClassicState::Init, LinkMode::Normal), &r).next,
                Some(expected),
                "{:?}",
                command
            );
        }
    }

    #[test]
    fn test_transition_sensor_data() {
        let r = response(FrameType::RequestNack, Command::RxSensorData, &[0x01, 0x00]);

        let t = transition(&ctx(ClassicState::Idle, LinkMode::Normal), &r);
        assert_eq!(t.next, Some(ClassicState::SendChannels));
        assert_eq!(t.effects, vec![Effect::DispatchTelemetry]);

        // Still dispatched during configuration, without changing state
        let t = transition(&ctx(ClassicState::SetTxPower, LinkMode::Normal), &r);
        assert_eq!(t.next, None);
        assert_eq!(t.effects, vec![Effect::DispatchTelemetry]);
    }

    #[test]
    fn test_transition_unknown_command_resumes_streaming() {
        let r = Response {
            frame_number: 9,
            frame_type: FrameType::RequestNack,
            command: 0x42,
            payload: vec![],
        };
        assert_eq!(
            transition(&ctx(ClassicState::Idle, LinkMode::Normal), &r).next,
            Some(ClassicState::SendChannels)
        );
        assert_eq!(
            transition(&ctx(ClassicState::SetTxPower, LinkMode::Normal), &r).next,
            None
        );
        assert_eq!(
            transition(&ctx(ClassicState::Idle, LinkMode::Bind), &r).next,
            None
        );
    }

    #[test]
    fn test_transition_range_test() {
        let r = response(FrameType::Answer, Command::TestRange, &[]);
        assert_eq!(
            transition(&ctx(ClassicState::SetRangeTest, LinkMode::RangeCheck), &r).next,
            Some(ClassicState::RangeTestRunning)
        );
        assert_eq!(
            transition(&ctx(ClassicState::SetRangeTest, LinkMode::Normal), &r).effects,
            vec![Effect::Reset]
        );
    }

    #[test]
    fn test_transition_version_returns_to_previous_state() {
        let r = response(FrameType::Answer, Command::GetVersionInfo, &[0x01, 0xAA, 0xBB]);
        let context = TransitionContext {
            state: ClassicState::GetRfVersionInfo,
            mode: LinkMode::Normal,
            return_state: ClassicState::SendChannels,
        };
        let t = transition(&context, &r);
        assert_eq!(t.next, Some(ClassicState::SendChannels));
        assert_eq!(
            t.effects,
            vec![Effect::StoreVersion {
                target: FirmwareTarget::RfModule,
                info: vec![0xAA, 0xBB]
            }]
        );
    }

    #[test]
    fn test_transition_version_from_version_state_goes_init() {
        let r = response(FrameType::Answer, Command::GetVersionInfo, &[0x00]);
        let context = TransitionContext {
            state: ClassicState::GetRxVersionInfo,
            mode: LinkMode::Normal,
            return_state: ClassicState::GetRxVersionInfo,
        };
        let t = transition(&context, &r);
        assert_eq!(t.next, Some(ClassicState::Init));
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_transition_rf_firmware_update() {
        let r = response(FrameType::Answer, Command::UpdateRfFirmware, &[]);
        let t = transition(&ctx(ClassicState::UpdateRfFirmware, LinkMode::Normal), &r);
        assert_eq!(t.next, Some(ClassicState::Idle));
        assert_eq!(t.effects, vec![Effect::FirmwareUpdateStarted]);
    }

    // ==================== Session Tests ====================

    #[test]
    fn test_first_request_after_timeout() {
        let mut h = Harness::new();
        for _ in 0..TIMEOUT_TICKS - 1 {
            assert!(h.session.tick(&h.model).is_none());
        }
        let frame = decode(&h.session.tick(&h.model).unwrap());
        assert_eq!(frame, vec![0x01, FrameType::RequestAck as u8, Command::RfInit as u8]);
        assert_eq!(h.session.last_sent(), Some(1));
    }

    #[test]
    fn test_progression_to_send_channels_without_skipping() {
        let mut h = Harness::new();
        let mut visited = vec![h.session.state()];

        for _ in 0..7 * TIMEOUT_TICKS {
            if let Some(wire) = h.session.tick(&h.model) {
                let frame = decode(&wire);
                if frame[1] == FrameType::RequestAck as u8 {
                    h.answer(&frame);
                }
            }
            if visited.last() != Some(&h.session.state()) {
                visited.push(h.session.state());
            }
        }

        assert_eq!(
            visited,
            vec![
                ClassicState::Init,
                ClassicState::SetReceiverId,
                ClassicState::GetReceiverConfig,
                ClassicState::SetTxPower,
                ClassicState::SetRxPwmPpm,
                ClassicState::SetRxIbusSbus,
                ClassicState::SetRxFrequency,
                ClassicState::SendChannels,
            ]
        );
        assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_configuration_payloads() {
        let mut config = ModuleConfig::default();
        config.high_power = true;
        config.serial_mode = SerialMode::Sbus;
        let mut h = Harness::with_config(config);

        let mut frames = Vec::new();
        while h.session.state() != ClassicState::SendChannels {
            let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
            if frame[1] == FrameType::RequestAck as u8 {
                h.answer(&frame);
            }
            frames.push(frame);
        }

        // number, type and command stripped
        let payloads: Vec<(u8, Vec<u8>)> = frames
            .iter()
            .map(|f| (f[2], f[3..].to_vec()))
            .collect();
        assert_eq!(
            payloads,
            vec![
                (Command::RfInit as u8, vec![]),
                (Command::SetReceiverId as u8, RX_ID.to_vec()),
                (Command::RfGetConfig as u8, vec![0x00, 0x01, 0x4D, 0x01]),
                (Command::SetTxPower as u8, vec![TX_POWER_HIGH]),
                (Command::SetRxPwmPpm as u8, vec![0x00]),
                (Command::SetRxIbusSbus as u8, vec![0x01]),
                (Command::SetRxServoFreq as u8, vec![0x4D, 0x01]),
            ]
        );
        // GetReceiverConfig goes out as an answer
        assert_eq!(frames[2][1], FrameType::Answer as u8);
    }

    #[test]
    fn test_out_of_range_frequency_sent_as_minimum() {
        let mut h = Harness::new();
        h.model = ModelData::new(
            14,
            BoundReceiverIdentity {
                rx_id: RX_ID,
                servo_freq_hz: 1000,
                protocol: 0,
            },
        );
        h.session.set_state(ClassicState::SetRxFrequency);
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(&frame[3..], &[50, 0]);
    }

    #[test]
    fn test_streams_channels_every_tick() {
        let mut h = Harness::new();
        h.bring_up();
        h.model.set_channel(0, 1024);

        let first = decode(&h.session.tick(&h.model).unwrap());
        let second = decode(&h.session.tick(&h.model).unwrap());

        assert_eq!(first[1], FrameType::RequestNack as u8);
        assert_eq!(first[2], Command::SendChannelData as u8);
        assert_eq!(first[3], 0x01); // live
        assert_eq!(first[4], 14);
        assert_eq!(u16::from_le_bytes([first[5], first[6]]), 2012);
        assert_eq!(second[0], first[0].wrapping_add(1));
    }

    #[test]
    fn test_failsafe_frame_in_stream() {
        let mut h = Harness::new();
        h.bring_up();
        h.model.set_failsafe(0, FailsafeMode::Hold);

        let modes: Vec<u8> = (0..800)
            .map(|_| decode(&h.session.tick(&h.model).unwrap())[3])
            .collect();
        let failsafe: Vec<usize> = modes
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m == 0x02)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failsafe.len(), 2);
        assert_eq!(failsafe[1] - failsafe[0], 400);
    }

    #[test]
    fn test_answer_with_stale_number_is_dropped() {
        let mut h = Harness::new();
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.receive(frame[0].wrapping_add(5), FrameType::Answer, Command::RfInit as u8, &[RF_READY]);
        assert_eq!(h.session.state(), ClassicState::Init);

        h.receive(frame[0], FrameType::Answer, Command::RfInit as u8, &[RF_READY]);
        assert_eq!(h.session.state(), ClassicState::SetReceiverId);
    }

    #[test]
    fn test_bad_checksum_is_dropped() {
        let mut h = Harness::new();
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        let wire = [0xC0, frame[0], 0x10, 0x01, 0x01, 0x00, 0xC0];
        for byte in wire {
            h.session.on_byte(byte, &mut h.model, &mut h.sink);
        }
        assert_eq!(h.session.state(), ClassicState::Init);
    }

    #[test]
    fn test_rf_not_ready_restarts() {
        let mut h = Harness::new();
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.receive(frame[0], FrameType::Answer, Command::RfInit as u8, &[0x00]);

        assert_eq!(h.session.state(), ClassicState::Init);
        assert_eq!(h.session.last_sent(), None);
        let retry = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(retry[0], 1);
    }

    #[test]
    fn test_unanswered_request_is_repeated() {
        let mut h = Harness::new();
        let first = h.next_frame(TIMEOUT_TICKS).unwrap();
        let second = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(first[2], second[2]);
        assert_eq!(second[0], first[0] + 1);
    }

    #[test]
    fn test_bind_persists_receiver_id() {
        let mut h = Harness::new();
        h.session.start_bind().unwrap();
        assert_eq!(h.session.connection_state(), ConnectionState::Binding);

        let init = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.answer(&init);
        assert_eq!(h.session.state(), ClassicState::Bind);

        let bind = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(bind[2], Command::Bind as u8);
        assert_eq!(&bind[3..], &[BIND_POWER_LOW, 0x08, 0x08, 0x08, 0x08]);

        // Frame number is not checked while binding; extra bytes ignored
        h.receive(0x77, FrameType::Answer, Command::Bind as u8, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);

        assert_eq!(h.model.bound_identity().rx_id, [0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(h.model.is_dirty());
        assert_eq!(h.session.mode(), LinkMode::Normal);
        assert_eq!(h.session.state(), ClassicState::Init);
        assert_eq!(
            h.session.take_events(),
            vec![LinkEvent::Bound {
                rx_id: Some([0xAA, 0xBB, 0xCC, 0xDD])
            }]
        );
        assert!(h.session.take_events().is_empty());
    }

    #[test]
    fn test_bind_survives_reset_and_reconfigures_with_new_id() {
        let mut h = Harness::new();
        h.session.start_bind().unwrap();
        let init = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.answer(&init);
        h.receive(0x01, FrameType::Answer, Command::Bind as u8, &[9, 8, 7, 6]);

        let init = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.answer(&init);
        let set_id = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(&set_id[3..], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_module_request_adopts_frame_number() {
        let mut h = Harness::new();
        h.bring_up();

        h.receive(0x42, FrameType::RequestAck, Command::RfGetConfig as u8, &[]);
        assert_eq!(h.session.state(), ClassicState::GetReceiverConfig);

        // Answer goes out on the very next tick with the module's number
        let frame = decode(&h.session.tick(&h.model).unwrap());
        assert_eq!(frame[0], 0x42);
        assert_eq!(frame[1], FrameType::Answer as u8);
        assert_eq!(frame[2], Command::RfGetConfig as u8);
        assert_eq!(h.session.state(), ClassicState::SetTxPower);
    }

    #[test]
    fn test_sensor_data_dispatched_while_streaming() {
        let mut h = Harness::new();
        h.bring_up();

        h.receive(0x10, FrameType::RequestNack, Command::RxSensorData as u8, &[0x01, 0x02, 0xE8, 0x03, 0xFF]);

        assert_eq!(
            h.sink,
            vec![TelemetryRecord {
                sensor_type: 0x01,
                data: vec![0xE8, 0x03]
            }]
        );
        assert_eq!(h.session.state(), ClassicState::SendChannels);
    }

    #[test]
    fn test_malformed_sensor_data_dispatches_nothing() {
        let mut h = Harness::new();
        h.bring_up();

        let mut sink = MockSensorSink::new();
        sink.expect_dispatch().times(0);

        let mut writer = FrameWriter::begin();
        writer.put_slice(&[0x10, FrameType::RequestNack as u8, Command::RxSensorData as u8, 0x01, 0x09, 0x00]);
        for &byte in writer.finish_checksum().iter() {
            h.session.on_byte(byte, &mut h.model, &mut sink);
        }
    }

    #[test]
    fn test_idle_heals_back_to_streaming() {
        let mut h = Harness::new();
        h.bring_up();

        h.receive(0x05, FrameType::RequestAck, Command::Bind as u8, &[]);
        assert_eq!(h.session.state(), ClassicState::Idle);
        assert!(h.session.tick(&h.model).is_none());

        h.receive(0x06, FrameType::RequestNack, 0x10, &[]);
        assert_eq!(h.session.state(), ClassicState::SendChannels);
    }

    #[test]
    fn test_version_request_round_trip() {
        let mut h = Harness::new();
        h.bring_up();

        h.session.request_version(FirmwareTarget::RfModule);
        let request = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(request[2], Command::GetVersionInfo as u8);
        assert_eq!(&request[3..], &[0x01]);

        h.receive(request[0], FrameType::Answer, Command::GetVersionInfo as u8, &[0x01, 0x10, 0x20]);

        assert_eq!(h.session.state(), ClassicState::SendChannels);
        assert_eq!(
            h.session.module_version(),
            Some(ModuleVersion::Firmware {
                target: FirmwareTarget::RfModule,
                info: vec![0x10, 0x20]
            })
        );
        assert_eq!(h.session.take_events(), vec![LinkEvent::VersionReceived]);
    }

    #[test]
    fn test_range_test_start_and_stop() {
        let mut h = Harness::new();
        h.bring_up();

        h.session.start_range_test().unwrap();
        let start = decode(&h.session.tick(&h.model).unwrap());
        assert_eq!(start[2], Command::TestRange as u8);
        assert_eq!(&start[3..], &[RANGE_TEST_START]);
        assert_eq!(h.session.connection_state(), ConnectionState::RangeTesting);

        h.receive(start[0], FrameType::Answer, Command::TestRange as u8, &[]);
        assert_eq!(h.session.state(), ClassicState::RangeTestRunning);

        // Nothing is sent while the test runs
        assert!(h.next_frame(TIMEOUT_TICKS * 3).is_none());

        h.session.stop_range_test();
        assert!(h.next_frame(TIMEOUT_TICKS).is_none());
        assert_eq!(h.session.state(), ClassicState::SetRangeTest);

        let stop = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(&stop[3..], &[RANGE_TEST_STOP]);

        h.receive(stop[0], FrameType::Answer, Command::TestRange as u8, &[]);
        assert_eq!(h.session.state(), ClassicState::Init);
    }

    #[test]
    fn test_range_check_lowers_tx_power() {
        let mut h = Harness::new();
        h.session.mode = LinkMode::RangeCheck;
        h.session.set_state(ClassicState::SetTxPower);
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(&frame[3..], &[TX_POWER_RANGE_CHECK]);
    }

    #[test]
    fn test_default_tx_power_is_low() {
        let mut h = Harness::new();
        h.session.set_state(ClassicState::SetTxPower);
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(&frame[3..], &[TX_POWER_LOW]);
    }

    #[test]
    fn test_rf_protocol_update() {
        let mut h = Harness::new();
        h.bring_up();

        h.session.set_rf_protocol(2);
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(frame[2], Command::SetRfProtocol as u8);
        assert_eq!(&frame[3..], &[2]);

        h.receive(frame[0], FrameType::Answer, Command::SetRfProtocol as u8, &[]);
        assert_eq!(h.session.state(), ClassicState::Init);
    }

    #[test]
    fn test_rf_firmware_update_flow() {
        let mut h = Harness::new();
        h.bring_up();

        h.session.start_firmware_update(FirmwareTarget::RfModule);
        assert_eq!(h.session.connection_state(), ConnectionState::Updating);

        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        assert_eq!(frame[2], Command::UpdateRfFirmware as u8);
        h.receive(frame[0], FrameType::Answer, Command::UpdateRfFirmware as u8, &[]);

        assert!(h.session.is_firmware_updating());
        assert_eq!(h.session.state(), ClassicState::Idle);
        assert_eq!(h.session.connection_state(), ConnectionState::Updating);

        h.session.firmware_update_finished();
        assert!(!h.session.is_firmware_updating());
        assert_eq!(h.session.state(), ClassicState::Init);
    }

    #[test]
    fn test_cancel_leaves_bind_mode() {
        let mut h = Harness::new();
        h.session.start_bind().unwrap();
        h.session.cancel();
        assert_eq!(h.session.mode(), LinkMode::Normal);
        assert_eq!(h.session.state(), ClassicState::Init);
        assert_eq!(h.session.connection_state(), ConnectionState::Initializing);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let mut h = Harness::new();
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();

        // Half a frame, then reset, then a clean answer
        for byte in [0xC0, frame[0], 0x10] {
            h.session.on_byte(byte, &mut h.model, &mut h.sink);
        }
        h.session.reset();
        let frame = h.next_frame(TIMEOUT_TICKS).unwrap();
        h.answer(&frame);
        assert_eq!(h.session.state(), ClassicState::SetReceiverId);
    }
}
