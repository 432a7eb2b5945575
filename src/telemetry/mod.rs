//! # Telemetry Module
//!
//! Extracts sensor records from validated telemetry frames and hands them to
//! a [`SensorSink`].
//!
//! This module handles:
//! - Classic sensor payloads (a run of entries ending at `0xFF`)
//! - Structured telemetry payloads (a single entry)
//! - Length validation (a bad entry drops the whole frame)
//! - JSONL logging of records with file rotation ([`logger`])
//!
//! ## Entry Layout
//!
//! ```text
//! sensor_type (u8) | length (u8) | data[length]
//! ```

pub mod logger;

use serde::Serialize;
use tracing::debug;

use crate::codec::FramingError;

/// Sensor type that terminates a classic sensor payload
pub const SENSOR_TYPE_END: u8 = 0xFF;

/// One sensor reading, opaque beyond its type and length
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    /// Sensor type byte as sent by the receiver
    pub sensor_type: u8,

    /// Raw sensor bytes
    pub data: Vec<u8>,
}

impl TelemetryRecord {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Destination for decoded sensor records.
#[cfg_attr(test, mockall::automock)]
pub trait SensorSink {
    /// Consumes one record. Called from the tick, so it must not block.
    fn dispatch(&mut self, record: TelemetryRecord);

    /// Writes out anything [`dispatch`](Self::dispatch) deferred.
    ///
    /// Called by the owner outside the tick.
    fn persist(&mut self) {}
}

/// Collects records in memory.
impl SensorSink for Vec<TelemetryRecord> {
    fn dispatch(&mut self, record: TelemetryRecord) {
        self.push(record);
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SensorSink for NullSink {
    fn dispatch(&mut self, _record: TelemetryRecord) {}
}

/// Reads one entry at `offset`, returning it and the offset after it.
fn read_entry(payload: &[u8], offset: usize) -> Result<(TelemetryRecord, usize), FramingError> {
    let header = payload
        .get(offset..offset + 2)
        .ok_or(FramingError::Truncated(payload.len()))?;
    let (sensor_type, length) = (header[0], header[1] as usize);

    let start = offset + 2;
    let data = payload.get(start..start + length).ok_or_else(|| {
        FramingError::Malformed(format!(
            "sensor 0x{:02X} claims {} bytes, {} left",
            sensor_type,
            length,
            payload.len().saturating_sub(start)
        ))
    })?;

    Ok((
        TelemetryRecord {
            sensor_type,
            data: data.to_vec(),
        },
        start + length,
    ))
}

/// Parses a classic sensor payload.
///
/// Entries run until the payload ends or a sensor type of
/// [`SENSOR_TYPE_END`] is reached. Any entry whose length runs past the
/// payload rejects the whole payload.
///
/// # Examples
///
/// ```
/// use flysky_link::telemetry::parse_classic;
///
/// let records = parse_classic(&[0x01, 0x02, 0xE8, 0x03, 0xFF]).unwrap();
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].data, vec![0xE8, 0x03]);
/// ```
pub fn parse_classic(payload: &[u8]) -> Result<Vec<TelemetryRecord>, FramingError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        if payload[offset] == SENSOR_TYPE_END {
            break;
        }
        let (record, next) = read_entry(payload, offset)?;
        records.push(record);
        offset = next;
    }

    Ok(records)
}

/// Parses a structured telemetry payload holding exactly one entry.
pub fn parse_structured(payload: &[u8]) -> Result<TelemetryRecord, FramingError> {
    read_entry(payload, 0).map(|(record, _)| record)
}

/// Parses and dispatches a classic sensor payload.
///
/// Returns the number of records dispatched; a rejected payload dispatches
/// nothing.
pub fn dispatch_classic(payload: &[u8], sink: &mut dyn SensorSink) -> usize {
    match parse_classic(payload) {
        Ok(records) => {
            let count = records.len();
            for record in records {
                sink.dispatch(record);
            }
            count
        }
        Err(e) => {
            debug!("Dropping sensor frame: {}", e);
            0
        }
    }
}

/// Parses and dispatches a structured telemetry payload.
pub fn dispatch_structured(payload: &[u8], sink: &mut dyn SensorSink) -> usize {
    match parse_structured(payload) {
        Ok(record) => {
            sink.dispatch(record);
            1
        }
        Err(e) => {
            debug!("Dropping telemetry frame: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_multiple_entries() {
        let payload = [0x01, 0x02, 0x10, 0x20, 0x02, 0x01, 0x55, 0xFF];
        let records = parse_classic(&payload).unwrap();

        assert_eq!(
            records,
            vec![
                TelemetryRecord { sensor_type: 0x01, data: vec![0x10, 0x20] },
                TelemetryRecord { sensor_type: 0x02, data: vec![0x55] },
            ]
        );
    }

    #[test]
    fn test_classic_ends_at_payload_end() {
        let records = parse_classic(&[0x03, 0x00]).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_empty());
    }

    #[test]
    fn test_classic_terminator_stops_parsing() {
        // Bytes after 0xFF are ignored even if they are garbage
        let records = parse_classic(&[0xFF, 0x01, 0x09]).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_classic_overrun_drops_frame() {
        let payload = [0x01, 0x01, 0xAA, 0x02, 0x05, 0x01];
        assert!(parse_classic(&payload).is_err());
    }

    #[test]
    fn test_classic_dangling_type_byte() {
        assert!(parse_classic(&[0x01, 0x01, 0xAA, 0x02]).is_err());
    }

    #[test]
    fn test_structured_single_entry() {
        let record = parse_structured(&[0x7C, 0x02, 0x34, 0x12, 0x99]).unwrap();
        assert_eq!(record.sensor_type, 0x7C);
        assert_eq!(record.data, vec![0x34, 0x12]);
    }

    #[test]
    fn test_structured_overrun() {
        assert!(parse_structured(&[0x7C, 0x04, 0x34]).is_err());
        assert!(parse_structured(&[]).is_err());
    }

    #[test]
    fn test_dispatch_classic_all_or_nothing() {
        let mut sink = MockSensorSink::new();
        sink.expect_dispatch().times(0);
        assert_eq!(dispatch_classic(&[0x01, 0x01, 0xAA, 0x02, 0x09], &mut sink), 0);
    }

    #[test]
    fn test_dispatch_classic_forwards_in_order() {
        let mut sink: Vec<TelemetryRecord> = Vec::new();
        let count = dispatch_classic(&[0x01, 0x01, 0xAA, 0x02, 0x01, 0xBB], &mut sink);

        assert_eq!(count, 2);
        assert_eq!(sink[0].sensor_type, 0x01);
        assert_eq!(sink[1].sensor_type, 0x02);
    }

    #[test]
    fn test_dispatch_structured_calls_sink_once() {
        let mut sink = MockSensorSink::new();
        sink.expect_dispatch()
            .withf(|record| record.sensor_type == 0x01 && record.data == vec![0x64])
            .times(1)
            .return_const(());
        assert_eq!(dispatch_structured(&[0x01, 0x01, 0x64], &mut sink), 1);
    }
}
