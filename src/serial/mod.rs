//! # Serial Communication Module
//!
//! Handles the serial link to the RF module and the hall stick controller.
//!
//! This module handles:
//! - The synchronous [`Transport`] the tick path writes frames into
//! - The receive [`ByteRing`] drained from the tick path
//! - Opening serial ports (8N1, no flow control) with `tokio-serial`
//! - Async read/write of the port from the host main loop

pub mod port_trait;
pub mod ring;

pub use port_trait::{SerialPortIO, TokioSerialPort};
pub use ring::{ByteRing, RING_CAPACITY};

use bytes::BytesMut;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, Result};

/// Default module device paths to try (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyACM0", // USB CDC devices
];

/// Outbound byte sink used from the tick context. Must not block.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    fn send_byte(&mut self, byte: u8);

    fn send_buffer(&mut self, data: &[u8]) {
        for &byte in data {
            self.send_byte(byte);
        }
    }
}

/// Collects outbound bytes until the async writer picks them up.
impl Transport for BytesMut {
    fn send_byte(&mut self, byte: u8) {
        self.extend_from_slice(&[byte]);
    }

    fn send_buffer(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

/// Serial port to the RF module or the hall stick controller.
pub struct ModulePort<P: SerialPortIO = TokioSerialPort> {
    port: P,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl<P: SerialPortIO> std::fmt::Debug for ModulePort<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulePort")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl ModulePort<TokioSerialPort> {
    /// Open a serial port, trying `paths` in order
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<ModulePort>` - Connected serial port or error
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::SerialPortNotFound`] if none of the paths opens
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flysky_link::serial::ModulePort;
    ///
    /// let port = ModulePort::open_with_paths(&["/dev/ttyUSB0"], 115_200)?;
    /// println!("Connected to: {}", port.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened {} at {} baud", path, baud_rate);
                    return Ok(Self::with_port(TokioSerialPort::new(port), path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(LinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open the configured port, falling back to the default paths.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let mut paths = vec![path];
        paths.extend(DEFAULT_DEVICE_PATHS.iter().filter(|p| **p != path));
        Self::open_with_paths(&paths, baud_rate)
    }
}

impl<P: SerialPortIO> ModulePort<P> {
    /// Wraps an already open port.
    pub fn with_port(port: P, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
        }
    }

    /// Write one or more complete frames and flush
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.port
            .write_all(frame)
            .await
            .map_err(|e| LinkError::Serial(format!("Failed to write frame: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| LinkError::Serial(format!("Failed to flush serial port: {}", e)))?;

        trace!("Sent {} bytes to {}", frame.len(), self.device_path);
        Ok(())
    }

    /// Read available bytes into `buf`
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.port
            .read(buf)
            .await
            .map_err(|e| LinkError::Serial(format!("Failed to read: {}", e)))
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

/// Open a specific serial port with 8N1 settings
fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| LinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::MockSerialPort;
    use super::*;
    use std::io;

    #[test]
    fn test_default_device_paths() {
        assert_eq!(DEFAULT_DEVICE_PATHS.len(), 2);
        assert_eq!(DEFAULT_DEVICE_PATHS[0], "/dev/ttyUSB0");
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let result = ModulePort::open_with_paths(invalid_paths, 115_200);

        match result {
            Err(LinkError::SerialPortNotFound(msg)) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            other => panic!("Expected SerialPortNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        match ModulePort::open_with_paths(empty_paths, 115_200) {
            Err(LinkError::SerialPortNotFound(_)) => {}
            other => panic!("Expected SerialPortNotFound, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = open_port("/dev/nonexistent_serial_device_12345", 115_200);

        match result {
            Err(LinkError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_bytes_mut_transport_collects() {
        let mut out = BytesMut::new();
        out.send_byte(0xC0);
        out.send_buffer(&[0x01, 0x02]);
        assert_eq!(&out[..], &[0xC0, 0x01, 0x02]);
    }

    #[test]
    fn test_transport_default_send_buffer_goes_bytewise() {
        struct Bytewise(Vec<u8>);
        impl Transport for Bytewise {
            fn send_byte(&mut self, byte: u8) {
                self.0.push(byte);
            }
        }

        let mut transport = Bytewise(Vec::new());
        transport.send_buffer(&[1, 2, 3]);
        assert_eq!(transport.0, vec![1, 2, 3]);
    }

    #[test]
    fn test_send_frame_writes_and_flushes() {
        let mock = MockSerialPort::new();
        let mut port = ModulePort::with_port(mock.clone(), "/dev/mock");

        tokio_test::block_on(port.send_frame(&[0xC0, 0x01, 0xC0])).unwrap();

        assert_eq!(mock.get_written_data(), vec![vec![0xC0, 0x01, 0xC0]]);
        assert_eq!(port.device_path(), "/dev/mock");
    }

    #[tokio::test]
    async fn test_send_frame_write_error() {
        let mock = MockSerialPort::new();
        mock.set_write_error(io::ErrorKind::BrokenPipe);
        let mut port = ModulePort::with_port(mock, "/dev/mock");

        match port.send_frame(&[0x00]).await {
            Err(LinkError::Serial(msg)) => assert!(msg.contains("Failed to write")),
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_frame_flush_error() {
        let mock = MockSerialPort::new();
        mock.set_flush_error(io::ErrorKind::TimedOut);
        let mut port = ModulePort::with_port(mock, "/dev/mock");

        match port.send_frame(&[0x00]).await {
            Err(LinkError::Serial(msg)) => assert!(msg.contains("Failed to flush")),
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_bytes() {
        let mock = MockSerialPort::new();
        mock.queue_read(&[1, 2, 3, 4]);
        let mut port = ModulePort::with_port(mock, "/dev/mock");

        let mut buf = [0u8; 3];
        assert_eq!(port.read_bytes(&mut buf).await.unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(port.read_bytes(&mut buf).await.unwrap(), 1);
    }

    #[test]
    #[ignore] // Run with: cargo test -- --ignored
    fn test_open_with_real_hardware() {
        match ModulePort::open("/dev/ttyUSB0", 115_200) {
            Ok(port) => println!("Opened module port at: {}", port.device_path()),
            Err(_) => println!("No module hardware detected (this is OK for CI/CD)"),
        }
    }
}
