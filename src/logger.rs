//! Unattended poll loop writing readings to storage.
use crate::{
    device::{LineDevice, Port},
    error::ParseError,
    output::{ReadingRecord, Storage},
    protocol::{Command, Measurement},
    schedule::Ticker,
};
use chrono::{Local, Utc};
use log::{debug, info, warn};
use std::{convert::Infallible, future::Future, time::Duration};

/// Pause between two poll cycles.
pub const POLL_PERIOD: Duration = Duration::from_secs(60);

/// Number of readings collected before they are written to disk.
pub const FLUSH_THRESHOLD: usize = 10;

/// Readings acquired but not yet persisted, oldest first.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    records: Vec<ReadingRecord>,
}

impl PendingBuffer {
    pub fn push(&mut self, record: ReadingRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ReadingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_due(&self) -> bool {
        self.records.len() >= FLUSH_THRESHOLD
    }

    /// Append all pending readings to `storage` and forget them. Returns the number of readings
    /// written.
    ///
    /// The buffer is only cleared after storage succeeded. An empty buffer does not touch storage.
    pub async fn flush<S>(&mut self, storage: &mut S) -> anyhow::Result<usize>
    where
        S: Storage + ?Sized,
    {
        if self.records.is_empty() {
            return Ok(0);
        }
        storage.append_readings(&self.records, Local::now()).await?;
        let count = self.records.len();
        self.records.clear();
        Ok(count)
    }
}

/// Result of a single poll cycle.
#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    Recorded(Measurement),
    Unexpected(ParseError),
}

/// Polls a measurement every [`POLL_PERIOD`] and persists it.
///
/// Malformed responses are logged and skipped. Errors of the device or of the storage end the
/// loop; restarting is left to whoever supervises the process.
pub struct PollingLogger<P, S> {
    device: LineDevice<P>,
    storage: S,
    pending: PendingBuffer,
    ticker: Ticker,
}

impl<P: Port, S: Storage> PollingLogger<P, S> {
    pub fn new(device: LineDevice<P>, storage: S) -> PollingLogger<P, S> {
        PollingLogger {
            device,
            storage,
            pending: PendingBuffer::default(),
            ticker: Ticker::new(POLL_PERIOD),
        }
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    /// Request, parse and store one measurement, flushing the pending readings when due.
    pub async fn poll_once(&mut self) -> anyhow::Result<PollOutcome> {
        self.device.write(Command::Send.as_bytes()).await?;
        let line = self.device.read_line().await?;
        let timestamp = Utc::now().timestamp();

        let outcome = match Measurement::parse(&line) {
            Ok(measurement) => {
                debug!("{}", measurement);
                self.pending.push(ReadingRecord::new(timestamp, measurement));
                self.storage
                    .write_snapshot(&measurement, Local::now())
                    .await?;
                PollOutcome::Recorded(measurement)
            }
            Err(e) => {
                warn!(
                    "Unexpected response from device {:?}: {}",
                    String::from_utf8_lossy(&line),
                    e
                );
                self.storage.log_unexpected(&line, Local::now()).await?;
                PollOutcome::Unexpected(e)
            }
        };

        if self.pending.is_due() {
            let count = self.pending.flush(&mut self.storage).await?;
            info!("Wrote {} readings", count);
        }
        Ok(outcome)
    }

    /// Poll forever. Only returns on a device or storage error.
    pub async fn run(mut self) -> anyhow::Result<Infallible> {
        info!("Polling every {:?}", self.ticker.period());
        loop {
            self.ticker.tick().await;
            self.poll_once().await?;
        }
    }

    /// Poll until `shutdown` resolves, then write out pending readings.
    ///
    /// Shutdown is only observed between cycles, a cycle in progress always completes.
    pub async fn run_until<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Polling every {:?}", self.ticker.period());
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.ticker.tick() => (),
            }
            self.poll_once().await?;
        }

        let count = self.pending.flush(&mut self.storage).await?;
        info!("Shutting down, wrote {} pending readings", count);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{PendingBuffer, PollOutcome, PollingLogger, FLUSH_THRESHOLD, POLL_PERIOD};
    use crate::device::{fake::FakePort, LineDevice};
    use crate::devices::gmw90::READ_TIMEOUT;
    use crate::error::ParseError;
    use crate::output::{memory::MemoryStore, ReadingRecord, Storage};
    use crate::protocol::Measurement;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::{DateTime, Local};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn line(co2: u32) -> String {
        format!(">T=22.34 'C  CO2={:4} ppm  RH=34.26 %RH", co2)
    }

    fn logger(port: &FakePort, store: &MemoryStore) -> PollingLogger<FakePort, MemoryStore> {
        PollingLogger::new(LineDevice::new(port.clone(), READ_TIMEOUT), store.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_good_response_is_buffered_and_snapshotted() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        port.respond_with([">T=22.34 'C  CO2=1343 ppm  RH=34.26 %RH"]);
        let mut logger = logger(&port, &store);

        let expected = Measurement {
            temperature: 22.34,
            co2: 1343,
            humidity: 34.26,
        };
        assert_eq!(
            logger.poll_once().await.unwrap(),
            PollOutcome::Recorded(expected)
        );
        assert_eq!(port.state().written, b"send\r");
        assert_eq!(logger.pending().len(), 1);
        assert_eq!(logger.pending().records()[0].co2, 1343);

        let recorded = store.recorded();
        assert_eq!(recorded.snapshots, [expected]);
        assert!(recorded.flushes.is_empty());
        assert!(recorded.unexpected.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_is_logged_and_skipped() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        port.respond_with([line(1000).as_str(), "garbage"]);
        let mut logger = logger(&port, &store);

        logger.poll_once().await.unwrap();
        let outcome = logger.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Unexpected(ParseError::Truncated {
                field: "temperature",
                len: 7
            })
        );
        assert_eq!(logger.pending().len(), 1);

        let recorded = store.recorded();
        assert_eq!(recorded.unexpected, [b"garbage\r\n".to_vec()]);
        assert_eq!(recorded.snapshots.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_is_an_unexpected_response() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        let mut logger = logger(&port, &store);

        let start = Instant::now();
        let outcome = logger.poll_once().await.unwrap();
        assert!(start.elapsed() >= READ_TIMEOUT);
        assert!(matches!(outcome, PollOutcome::Unexpected(_)));
        assert!(logger.pending().is_empty());
        assert_eq!(store.recorded().unexpected, [Vec::<u8>::new()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_polls_flush_once_in_order() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        let lines: Vec<String> = (1000..1010).map(line).collect();
        port.respond_with(lines.iter().map(String::as_str));
        let mut logger = logger(&port, &store);

        for _ in 0..FLUSH_THRESHOLD - 1 {
            logger.poll_once().await.unwrap();
        }
        assert!(store.recorded().flushes.is_empty());
        assert_eq!(logger.pending().len(), FLUSH_THRESHOLD - 1);

        logger.poll_once().await.unwrap();
        assert!(logger.pending().is_empty());

        let recorded = store.recorded();
        assert_eq!(recorded.flushes.len(), 1);
        let co2: Vec<u32> = recorded.flushes[0].iter().map(|r| r.co2).collect();
        assert_eq!(co2, (1000..1010).collect::<Vec<u32>>());
        assert!(recorded.flushes[0]
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    /// Storage refusing to append readings.
    struct ReadOnlyStore;

    #[async_trait]
    impl Storage for ReadOnlyStore {
        async fn append_readings(
            &mut self,
            _records: &[ReadingRecord],
            _now: DateTime<Local>,
        ) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }

        async fn write_snapshot(
            &mut self,
            _measurement: &Measurement,
            _now: DateTime<Local>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn log_unexpected(
            &mut self,
            _line: &[u8],
            _now: DateTime<Local>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_readings_and_is_fatal() {
        let port = FakePort::default();
        let lines: Vec<String> = (1000..1010).map(line).collect();
        port.respond_with(lines.iter().map(String::as_str));
        let mut logger = PollingLogger::new(LineDevice::new(port, READ_TIMEOUT), ReadOnlyStore);

        for _ in 0..FLUSH_THRESHOLD - 1 {
            logger.poll_once().await.unwrap();
        }
        let err = logger.poll_once().await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        let co2: Vec<u32> = logger.pending().records().iter().map(|r| r.co2).collect();
        assert_eq!(co2, (1000..1010).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_flush_twice_writes_nothing_new() {
        let store = MemoryStore::default();
        let mut buffer = PendingBuffer::default();
        for t in 0..3 {
            buffer.push(ReadingRecord {
                timestamp: t,
                temperature: 20.0,
                co2: 400,
                humidity: 40.0,
            });
        }

        let mut sink = store.clone();
        assert_eq!(buffer.flush(&mut sink).await.unwrap(), 3);
        assert_eq!(buffer.flush(&mut sink).await.unwrap(), 0);
        assert!(buffer.is_empty());
        assert_eq!(store.recorded().flushes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_cycles_flushes_pending() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        port.respond_with([line(1001).as_str(), line(1002).as_str(), line(1003).as_str()]);
        let logger = logger(&port, &store);

        // Cycles start at 0, 60 and 120 seconds, shutdown arrives while sleeping after the third
        logger
            .run_until(sleep(POLL_PERIOD * 2 + Duration::from_secs(30)))
            .await
            .unwrap();

        let sends = port.state().commands.len();
        assert_eq!(sends, 3);
        let recorded = store.recorded();
        assert_eq!(recorded.flushes.len(), 1);
        let co2: Vec<u32> = recorded.flushes[0].iter().map(|r| r.co2).collect();
        assert_eq!(co2, [1001, 1002, 1003]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_lines_never_stop_the_loop() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        let mut lines: Vec<String> = (1000..1010).map(line).collect();
        lines.insert(4, "T=22.3".to_string());
        port.respond_with(lines.iter().map(String::as_str));
        let logger = logger(&port, &store);

        // Eleven cycles, the last one starting after ten periods
        logger
            .run_until(sleep(POLL_PERIOD * 10 + Duration::from_secs(30)))
            .await
            .unwrap();

        let recorded = store.recorded();
        assert_eq!(recorded.unexpected.len(), 1);
        assert_eq!(recorded.snapshots.len(), 10);
        // Buffer was flushed by the tenth reading, nothing left for shutdown
        assert_eq!(recorded.flushes.len(), 1);
        assert_eq!(recorded.flushes[0].len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_fatal() {
        let (port, store) = (FakePort::default(), MemoryStore::default());
        port.respond_with([line(1000).as_str()]);
        port.state().unplugged = true;
        let logger = logger(&port, &store);

        assert!(logger.run().await.is_err());
        assert!(store.recorded().unexpected.is_empty());
    }
}
