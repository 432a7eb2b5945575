//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::afhds3::protocol::COMMAND_TIMEOUT_MS;
use crate::channels::{FailsafeMode, MAX_CHANNELS};
use crate::error::{LinkError, Result};
use crate::model::{BoundReceiverIdentity, SERVO_FREQ_MAX, SERVO_FREQ_MIN};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub module: ModuleConfig,
    pub failsafe: FailsafeConfig,
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub hall: HallConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Link protocol variant spoken by the RF module
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Classic byte-stuffed protocol
    Afhds2,
    /// Structured request/response protocol
    Afhds3,
}

/// Receiver servo output type
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PulseMode {
    Pwm,
    Ppm,
}

/// Receiver serial bus output type
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SerialMode {
    Ibus,
    Sbus,
}

/// RF module and bound receiver settings
#[derive(Debug, Deserialize, Clone)]
pub struct ModuleConfig {
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,

    /// Tick period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Structured protocol: wait before resending a command
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Structured protocol: attempts before a command is abandoned
    #[serde(default = "default_retry_count")]
    pub retry_count: u16,

    #[serde(default)]
    pub channels_start: usize,

    #[serde(default = "default_channel_count")]
    pub channel_count: usize,

    #[serde(default)]
    pub high_power: bool,

    #[serde(default = "default_pulse_mode")]
    pub pulse_mode: PulseMode,

    #[serde(default = "default_serial_mode")]
    pub serial_mode: SerialMode,

    #[serde(default = "default_servo_freq_hz")]
    pub servo_freq_hz: u16,

    /// Receiver ID of the bound receiver
    #[serde(default)]
    pub rx_id: [u8; 4],

    /// Classic RF protocol subtype (0: AFHDS1, 1: AFHDS2, 2: AFHDS2A)
    #[serde(default)]
    pub rf_protocol: u8,

    #[serde(default)]
    pub bind_power: u8,

    #[serde(default)]
    pub run_power: u8,

    /// 0: FCC, 1: CE
    #[serde(default)]
    pub emi_standard: u8,

    #[serde(default = "default_module_telemetry")]
    pub telemetry: bool,

    /// Structured protocol: receiver failsafe timeout in milliseconds
    #[serde(default = "default_failsafe_timeout_ms")]
    pub failsafe_timeout_ms: u16,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            period_ms: default_period_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            retry_count: default_retry_count(),
            channels_start: 0,
            channel_count: default_channel_count(),
            high_power: false,
            pulse_mode: default_pulse_mode(),
            serial_mode: default_serial_mode(),
            servo_freq_hz: default_servo_freq_hz(),
            rx_id: [0; 4],
            rf_protocol: 0,
            bind_power: 0,
            run_power: 0,
            emi_standard: 0,
            telemetry: default_module_telemetry(),
            failsafe_timeout_ms: default_failsafe_timeout_ms(),
        }
    }
}

impl ModuleConfig {
    /// Receiver identity as stored in the configuration
    #[must_use]
    pub fn bound_identity(&self) -> BoundReceiverIdentity {
        BoundReceiverIdentity {
            rx_id: self.rx_id,
            servo_freq_hz: self.servo_freq_hz,
            protocol: self.rf_protocol,
        }
    }

    /// Ticks that make up `ms`, at least one
    #[must_use]
    pub fn ticks_for(&self, ms: u64) -> u32 {
        (ms / self.period_ms.max(1)).max(1) as u32
    }
}

/// How failsafe values are chosen when none are set per channel
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeKind {
    Hold,
    Custom,
    NotSet,
}

/// Failsafe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FailsafeConfig {
    #[serde(default = "default_failsafe_mode")]
    pub mode: FailsafeKind,

    /// Logical values used in `custom` mode, one per channel
    #[serde(default)]
    pub custom_values: Vec<i16>,
}

impl FailsafeConfig {
    /// Failsafe behavior of channel `index`
    #[must_use]
    pub fn mode_for(&self, index: usize) -> FailsafeMode {
        match self.mode {
            FailsafeKind::Hold => FailsafeMode::Hold,
            FailsafeKind::NotSet => FailsafeMode::NotSet,
            FailsafeKind::Custom => self
                .custom_values
                .get(index)
                .map(|&v| FailsafeMode::Custom(v))
                .unwrap_or(FailsafeMode::NotSet),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Hall stick (gimbal controller) port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HallConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_hall_port")]
    pub port: String,

    #[serde(default = "default_hall_baud_rate")]
    pub baud_rate: u32,
}

impl Default for HallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_hall_port(),
            baud_rate: default_hall_baud_rate(),
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 100 }

fn default_protocol() -> Protocol { Protocol::Afhds2 }
fn default_period_ms() -> u64 { 4 }
fn default_response_timeout_ms() -> u64 { COMMAND_TIMEOUT_MS }
fn default_retry_count() -> u16 { 5 }
fn default_channel_count() -> usize { 14 }
fn default_pulse_mode() -> PulseMode { PulseMode::Pwm }
fn default_serial_mode() -> SerialMode { SerialMode::Ibus }
fn default_servo_freq_hz() -> u16 { 50 }
fn default_module_telemetry() -> bool { true }
fn default_failsafe_timeout_ms() -> u16 { 500 }

fn default_failsafe_mode() -> FailsafeKind { FailsafeKind::NotSet }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_hall_port() -> String { "/dev/ttyUSB1".to_string() }
fn default_hall_baud_rate() -> u32 { 921600 }

fn invalid(message: impl std::fmt::Display) -> LinkError {
    LinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flysky_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if ![115200, 921600, 1500000].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 115200, 921600, 1500000"));
        }

        let module = &self.module;

        if module.period_ms == 0 || module.period_ms > 100 {
            return Err(invalid("period_ms must be between 1 and 100"));
        }

        if module.response_timeout_ms == 0 || module.response_timeout_ms > 1000 {
            return Err(invalid("response_timeout_ms must be between 1 and 1000"));
        }

        if module.retry_count == 0 {
            return Err(invalid("retry_count must be greater than 0"));
        }

        if module.channel_count == 0 || module.channel_count > MAX_CHANNELS {
            return Err(invalid(format!(
                "channel_count must be between 1 and {}",
                MAX_CHANNELS
            )));
        }

        if !(SERVO_FREQ_MIN..=SERVO_FREQ_MAX).contains(&module.servo_freq_hz) {
            return Err(invalid(format!(
                "servo_freq_hz must be between {} and {}",
                SERVO_FREQ_MIN, SERVO_FREQ_MAX
            )));
        }

        if module.rf_protocol > 2 {
            return Err(invalid("rf_protocol must be 0 (AFHDS1), 1 (AFHDS2) or 2 (AFHDS2A)"));
        }

        if module.bind_power > 4 || module.run_power > 4 {
            return Err(invalid("bind_power and run_power must be between 0 and 4"));
        }

        if module.emi_standard > 1 {
            return Err(invalid("emi_standard must be 0 (FCC) or 1 (CE)"));
        }

        if self.failsafe.mode == FailsafeKind::Custom {
            if self.failsafe.custom_values.len() < module.channel_count {
                return Err(invalid(format!(
                    "custom failsafe needs {} values, got {}",
                    module.channel_count,
                    self.failsafe.custom_values.len()
                )));
            }
            if self.failsafe.custom_values.iter().any(|v| !(-1024..=1024).contains(v)) {
                return Err(invalid("custom failsafe values must be between -1024 and 1024"));
            }
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.hall.enabled && self.hall.port.is_empty() {
            return Err(invalid("hall port cannot be empty when enabled"));
        }

        Ok(())
    }
}
