extern crate anyhow;

// Rexport main API
pub use device::LineDevice;
pub use logger::PollingLogger;
pub use output::{FileStore, ReadingRecord, Storage};
pub use protocol::Measurement;

pub mod device;
pub mod devices;
pub mod logger;
pub mod output;
pub mod protocol;
pub mod schedule;

/// Rexports all error types
pub mod error {
    pub use crate::device::error::*;
    pub use crate::protocol::error::*;
}
