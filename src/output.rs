//! Adapter for data output
use crate::protocol::Measurement;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

/// A measurement stamped with the Unix time it was taken at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingRecord {
    pub timestamp: i64,
    pub temperature: f64,
    pub co2: u32,
    pub humidity: f64,
}

impl ReadingRecord {
    pub fn new(timestamp: i64, measurement: Measurement) -> ReadingRecord {
        ReadingRecord {
            timestamp,
            temperature: measurement.temperature,
            co2: measurement.co2,
            humidity: measurement.humidity,
        }
    }
}

/// CSV row `<timestamp>, <temperature>, <co2>, <humidity>`.
///
/// Floats are printed with `Debug` so whole numbers keep their fractional digit (`22.0`).
impl fmt::Display for ReadingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {:?}, {}, {:?}",
            self.timestamp, self.temperature, self.co2, self.humidity
        )
    }
}

/// Persistent sinks of the logger.
#[async_trait]
pub trait Storage {
    /// Append `records` in order to the store of the month `now` falls into.
    async fn append_readings(
        &mut self,
        records: &[ReadingRecord],
        now: DateTime<Local>,
    ) -> anyhow::Result<()>;

    /// Replace the latest observation with `measurement`.
    async fn write_snapshot(
        &mut self,
        measurement: &Measurement,
        now: DateTime<Local>,
    ) -> anyhow::Result<()>;

    /// Record a response that could not be parsed.
    async fn log_unexpected(&mut self, line: &[u8], now: DateTime<Local>) -> anyhow::Result<()>;
}

/// Storage in plain text files.
///
/// Readings go to one CSV file per month, `<data_dir>/<year>-<month>.csv`. Malformed responses
/// are appended to `<data_dir>/log.txt`. The snapshot file holds temperature, CO2, humidity and
/// the local time of the latest reading, one per line.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
    snapshot: PathBuf,
}

impl FileStore {
    /// Create the store, creating `data_dir` if it does not exist.
    pub async fn create(
        data_dir: impl Into<PathBuf>,
        snapshot: impl Into<PathBuf>,
    ) -> anyhow::Result<FileStore> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(FileStore {
            data_dir,
            snapshot: snapshot.into(),
        })
    }

    pub fn month_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}.csv", now.year(), now.month()))
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.data_dir.join("log.txt")
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot
    }
}

async fn append(path: &Path, contents: &str) -> anyhow::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl Storage for FileStore {
    async fn append_readings(
        &mut self,
        records: &[ReadingRecord],
        now: DateTime<Local>,
    ) -> anyhow::Result<()> {
        let rows: String = records.iter().map(|r| format!("{}\n", r)).collect();
        append(&self.month_path(&now), &rows).await
    }

    async fn write_snapshot(
        &mut self,
        measurement: &Measurement,
        now: DateTime<Local>,
    ) -> anyhow::Result<()> {
        let contents = format!(
            "{:?}\n{}\n{:?}\n{}\n",
            measurement.temperature,
            measurement.co2,
            measurement.humidity,
            now.format("%Y-%m-%d %H:%M:%S%.6f")
        );
        fs::write(&self.snapshot, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.snapshot.display()))
    }

    async fn log_unexpected(&mut self, line: &[u8], now: DateTime<Local>) -> anyhow::Result<()> {
        let response = String::from_utf8_lossy(line);
        let entry = format!(
            "{}: Unexpected response from device: {}\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            response.trim_end_matches(['\r', '\n']).escape_debug()
        );
        append(&self.error_log_path(), &entry).await
    }
}
