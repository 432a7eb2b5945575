//! # FlySky Link
//!
//! Drives a FlySky RF module from the host over a serial port.
//!
//! ## Control Flow
//!
//! 1. **Initialization**
//!    - Set up logging with a non-blocking tracing subscriber
//!    - Load the TOML configuration (first argument, or `config/default.toml`)
//!    - Open the module port and, if enabled, the hall stick port
//!
//! 2. **Main Loop**
//!    - Tick the module driver every `period_ms`
//!    - Feed received module bytes into the driver's receive ring
//!    - Feed hall stick readings into model channels 0-3
//!    - Log link events and bound receiver changes
//!
//! 3. **Graceful Shutdown** on Ctrl+C
//!
//! ```bash
//! RUST_LOG=flysky_link=debug cargo run --release -- config/default.toml
//! ```

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flysky_link::config::Config;
use flysky_link::driver::ModuleDriver;
use flysky_link::hall::{HallEvent, HallStickLink, HALL_STICK_COUNT};
use flysky_link::link::LinkEvent;
use flysky_link::model::{Model, ModelData};
use flysky_link::serial::ModulePort;
use flysky_link::telemetry::logger::JsonlLogger;
use flysky_link::telemetry::{NullSink, SensorSink};

/// Used when no configuration path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Number of ticks between status log messages
const LOG_INTERVAL_TICKS: u64 = 1000;

/// Hall stick port together with its link state
struct HallInput {
    port: ModulePort,
    link: HallStickLink,
}

#[tokio::main]
async fn main() -> Result<()> {
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .init();

    info!("FlySky Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!("Loaded configuration from {}", config_path);

    let mut module = ModulePort::open(&config.serial.port, config.serial.baud_rate)
        .context("failed to open RF module port")?;
    info!("RF module port opened at: {}", module.device_path());

    let mut hall = if config.hall.enabled {
        match ModulePort::open_with_paths(&[config.hall.port.as_str()], config.hall.baud_rate) {
            Ok(port) => Some(HallInput {
                port,
                link: HallStickLink::new(),
            }),
            Err(e) => {
                warn!("Hall stick disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let channel_total = config.module.channels_start + config.module.channel_count;
    let mut model = ModelData::new(channel_total, config.module.bound_identity());
    for index in 0..channel_total {
        model.set_failsafe(index, config.failsafe.mode_for(index));
    }

    let mut sink: Box<dyn SensorSink> = if config.telemetry.enabled {
        Box::new(JsonlLogger::new(&config.telemetry).context("failed to start telemetry logger")?)
    } else {
        Box::new(NullSink)
    };

    let mut driver = ModuleDriver::for_config(&config.module, BytesMut::new());

    let started = Instant::now();
    let mut tick_timer = interval(Duration::from_millis(config.module.period_ms));
    tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut module_buf = [0u8; 256];
    let mut hall_buf = [0u8; 256];
    let mut ticks: u64 = 0;
    let mut frames_sent: u64 = 0;

    info!(
        "Starting {:?} link at {}ms period",
        config.module.protocol, config.module.period_ms
    );
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = tick_timer.tick() => {
                ticks += 1;

                if let Some(input) = hall.as_mut() {
                    let now_ms = started.elapsed().as_millis() as u64;
                    if let Some(request) = input.link.tick(now_ms) {
                        if let Err(e) = input.port.send_frame(&request).await {
                            debug!("Failed to send hall request: {}", e);
                        }
                    }
                    for stick in 0..HALL_STICK_COUNT {
                        model.set_channel(stick, i32::from(input.link.channel_value(stick)));
                    }
                }

                if driver.tick(&mut model, sink.as_mut()) {
                    frames_sent += 1;
                }

                let outbound = driver.transport_mut().split();
                if !outbound.is_empty() {
                    if let Err(e) = module.send_frame(&outbound).await {
                        debug!("Failed to send frame: {}", e);
                    }
                }

                sink.persist();

                for event in driver.take_events() {
                    if event == LinkEvent::VersionReceived {
                        if let Some(version) = driver.module_version() {
                            info!("Module version: {}", version);
                            continue;
                        }
                    }
                    log_event(&event);
                }

                if model.is_dirty() {
                    let identity = model.bound_identity();
                    info!(
                        "Bound receiver ID {:02X?} ({} Hz); update rx_id in {} to keep it",
                        identity.rx_id, identity.sanitized_freq(), config_path
                    );
                    model.clear_dirty();
                }

                if ticks % LOG_INTERVAL_TICKS == 0 {
                    info!(
                        "{:?}: {} frames sent in {} ticks",
                        driver.connection_state(), frames_sent, ticks
                    );
                }
            }

            result = module.read_bytes(&mut module_buf) => {
                match result {
                    Ok(n) => driver.on_bytes_received(&module_buf[..n]),
                    Err(e) => warn!("Module read failed: {}", e),
                }
            }

            result = read_hall(&mut hall, &mut hall_buf) => {
                match (result, hall.as_mut()) {
                    (Ok(n), Some(input)) => {
                        for &byte in &hall_buf[..n] {
                            if let Some(HallEvent::CalibrationReceived(_)) = input.link.on_byte(byte) {
                                info!("Hall stick calibrated");
                            }
                        }
                    }
                    (Err(e), _) => warn!("Hall read failed: {}", e),
                    _ => {}
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                driver.cancel();
                info!("Total frames sent: {}", frames_sent);
                break;
            }
        }
    }

    Ok(())
}

/// Reads from the hall port, or waits forever when there is none.
async fn read_hall(hall: &mut Option<HallInput>, buf: &mut [u8]) -> flysky_link::error::Result<usize> {
    match hall.as_mut() {
        Some(input) => input.port.read_bytes(buf).await,
        None => std::future::pending().await,
    }
}

fn log_event(event: &LinkEvent) {
    match event {
        LinkEvent::Bound { rx_id: Some(id) } => info!("Bound to receiver {:02X?}", id),
        LinkEvent::Bound { rx_id: None } => info!("Bind complete"),
        LinkEvent::CommandFailed { command } => warn!("Module command 0x{:02X} failed", command),
        LinkEvent::ModuleStateChanged { from, to } => info!("Module state {:?} -> {:?}", from, to),
        LinkEvent::VersionReceived => info!("Module version received"),
    }
}
