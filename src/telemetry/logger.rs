//! # JSONL Telemetry Logger
//!
//! Writes one JSON object per sensor record to rotating files:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.000+00:00","sensor_type":1,"length":2,"data":[232,3]}
//! ```
//!
//! A file is closed after `max_records_per_file` records. Only the newest
//! `max_files_to_keep` files survive a rotation.
//!
//! Records dispatched from the tick are only queued in memory; the owner
//! calls [`JsonlLogger::write_pending`] (or [`SensorSink::persist`]) from
//! its own loop to put them on disk.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{SensorSink, TelemetryRecord};
use crate::config::TelemetryConfig;
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// Records held between writes before new ones are dropped
pub const MAX_PENDING_RECORDS: usize = 4096;

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: &'a str,
    sensor_type: u8,
    length: usize,
    data: &'a [u8],
}

/// Rotating JSONL writer for sensor records.
#[derive(Debug)]
pub struct JsonlLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    sequence: u32,
    pending: Vec<(String, TelemetryRecord)>,
    dropped: u64,
}

impl JsonlLogger {
    /// Creates the log directory if needed. No file is opened until the
    /// first record arrives.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        fs::create_dir_all(&config.log_dir)?;
        info!("Telemetry logging to {}", config.log_dir);

        Ok(Self {
            dir: PathBuf::from(&config.log_dir),
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            sequence: 0,
            pending: Vec::new(),
            dropped: 0,
        })
    }

    /// Appends one record now, rotating first if the current file is full.
    pub fn log(&mut self, record: &TelemetryRecord) -> Result<()> {
        self.write_line(&timestamp(), record)?;
        self.flush()
    }

    /// Queues a record without touching the filesystem.
    ///
    /// The timestamp is taken here, not when the record is written.
    pub fn enqueue(&mut self, record: TelemetryRecord) {
        if self.pending.len() >= MAX_PENDING_RECORDS {
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 1000 == 0 {
                warn!("Telemetry queue full, {} records dropped", self.dropped);
            }
            return;
        }
        self.pending.push((timestamp(), record));
    }

    /// Records queued and not yet written
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records dropped because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Writes every queued record and flushes once.
    ///
    /// Returns how many records were written. On error the unwritten
    /// records stay queued.
    pub fn write_pending(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut queue = std::mem::take(&mut self.pending).into_iter();
        let mut written = 0;
        while let Some((stamp, record)) = queue.next() {
            if let Err(e) = self.write_line(&stamp, &record) {
                self.pending = std::iter::once((stamp, record)).chain(queue).collect();
                return Err(e);
            }
            written += 1;
        }
        self.flush()?;
        Ok(written)
    }

    fn write_line(&mut self, timestamp: &str, record: &TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = LogLine {
            timestamp,
            sensor_type: record.sensor_type,
            length: record.len(),
            data: &record.data,
        };

        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, &line)?;
            writer.write_all(b"\n")?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    /// Flushes the open file, if any.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;

        self.sequence = self.sequence.wrapping_add(1);
        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_SUFFIX
        );
        let path = self.dir.join(name);
        debug!("Opening telemetry log {}", path.display());

        self.writer = Some(BufWriter::new(File::create(&path)?));
        self.records_in_file = 0;

        self.prune()
    }

    /// Deletes the oldest log files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let mut files = log_files(&self.dir)?;
        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            debug!("Removing old telemetry log {}", path.display());
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl SensorSink for JsonlLogger {
    fn dispatch(&mut self, record: TelemetryRecord) {
        self.enqueue(record);
    }

    fn persist(&mut self) {
        if let Err(e) = self.write_pending() {
            warn!("Failed to write telemetry records: {}", e);
        }
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        let _ = self.write_pending();
        let _ = self.flush();
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Telemetry log files in `dir`, unsorted.
fn log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
            .unwrap_or(false);
        if is_log {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, per_file: usize, keep: usize) -> TelemetryConfig {
        TelemetryConfig {
            enabled: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            max_records_per_file: per_file,
            max_files_to_keep: keep,
        }
    }

    fn record(sensor_type: u8) -> TelemetryRecord {
        TelemetryRecord {
            sensor_type,
            data: vec![0xE8, 0x03],
        }
    }

    #[test]
    fn test_no_file_before_first_record() {
        let dir = TempDir::new().unwrap();
        let _logger = JsonlLogger::new(&config(&dir, 10, 3)).unwrap();
        assert!(log_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlLogger::new(&config(&dir, 10, 3)).unwrap();

        logger.log(&record(1)).unwrap();
        logger.log(&record(2)).unwrap();

        let files = log_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);

        let content = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sensor_type"], 1);
        assert_eq!(lines[1]["sensor_type"], 2);
        assert_eq!(lines[0]["length"], 2);
        assert_eq!(lines[0]["data"], serde_json::json!([232, 3]));
        assert!(lines[0]["timestamp"].is_string());
    }

    #[test]
    fn test_rotation_and_retention() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlLogger::new(&config(&dir, 2, 2)).unwrap();

        for i in 0..7 {
            logger.dispatch(record(i));
        }
        assert_eq!(logger.write_pending().unwrap(), 7);

        // 7 records at 2 per file opens 4 files; only the newest 2 remain
        let mut files = log_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files.len(), 2);

        let last = fs::read_to_string(&files[1]).unwrap();
        assert_eq!(last.lines().count(), 1);
        let first = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(first.lines().count(), 2);
    }

    #[test]
    fn test_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let mut logger = JsonlLogger::new(&config(&dir, 1, 1)).unwrap();
        logger.log(&record(1)).unwrap();
        logger.log(&record(2)).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(log_files(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_dispatch_defers_file_io() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlLogger::new(&config(&dir, 10, 3)).unwrap();

        logger.dispatch(record(1));
        logger.dispatch(record(2));
        logger.dispatch(record(3));
        assert_eq!(logger.pending_len(), 3);
        assert!(log_files(dir.path()).unwrap().is_empty());

        logger.persist();
        assert_eq!(logger.pending_len(), 0);
        let files = log_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_write_pending_with_nothing_queued() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlLogger::new(&config(&dir, 10, 3)).unwrap();
        assert_eq!(logger.write_pending().unwrap(), 0);
        assert!(log_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_full_queue_drops_new_records() {
        let dir = TempDir::new().unwrap();
        let mut logger = JsonlLogger::new(&config(&dir, 10_000, 3)).unwrap();

        for i in 0..MAX_PENDING_RECORDS + 5 {
            logger.dispatch(record(i as u8));
        }
        assert_eq!(logger.pending_len(), MAX_PENDING_RECORDS);
        assert_eq!(logger.dropped(), 5);
        assert_eq!(logger.write_pending().unwrap(), MAX_PENDING_RECORDS);
    }

    #[test]
    fn test_queued_records_written_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let mut logger = JsonlLogger::new(&config(&dir, 10, 3)).unwrap();
            logger.dispatch(record(4));
        }
        let files = log_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap().lines().count(), 1);
    }
}
