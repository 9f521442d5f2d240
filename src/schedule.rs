//! Pacing of the poll loop.
use std::time::Duration;
use tokio::time::sleep;

/// Fixed pause between consecutive poll cycles.
///
/// The first tick completes immediately, every following tick sleeps for the full period. Time
/// spent inside a cycle is not subtracted, so the loop slowly drifts by the duration of each
/// cycle. Sleeping goes through the tokio clock and can therefore be paused in tests or raced
/// against a shutdown signal.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    started: bool,
}

impl Ticker {
    pub fn new(period: Duration) -> Ticker {
        Ticker {
            period,
            started: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until the next cycle is due.
    pub async fn tick(&mut self) {
        if self.started {
            sleep(self.period).await;
        }
        self.started = true;
    }
}
