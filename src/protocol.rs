//! Commands and responses of the GMW90 serial service connection.
//!
//! A measurement is requested with `send` and answered with one line of fixed width text:
//!
//! ```text
//! >T=22.34 'C  CO2=1343 ppm  RH=34.26 %RH
//! ```
//!
//! Fields are picked at fixed byte offsets. The layout is brittle, so all knowledge about it is
//! kept in [`Measurement::parse`].
use crate::error::ParseError;
use std::fmt::{self, Display};
use std::ops::Range;
use std::str::FromStr;

/// Commands understood by the device. Each is terminated by a carriage return on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Bare carriage return, wakes up the service prompt.
    Wake,
    /// Reboot the device.
    Reset,
    /// Request a single measurement.
    Send,
}

impl Command {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Command::Wake => b"\r",
            Command::Reset => b"reset\r",
            Command::Send => b"send\r",
        }
    }
}

const TEMPERATURE: Range<usize> = 3..8;
const CO2: Range<usize> = 17..21;
const HUMIDITY: Range<usize> = 30..35;

/// One reading of the meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Temperature in degree Celsius
    pub temperature: f64,
    /// CO2 concentration in ppm
    pub co2: u32,
    /// Relative humidity in percent
    pub humidity: f64,
}

impl Measurement {
    /// Parse a response line of the `send` command.
    ///
    /// Fails if the line is too short for any of the fields or a field is not a number. Blanks
    /// around a field are ignored, so space padded values are accepted. The line terminator is
    /// not part of the layout: a field cut short by it counts as truncated.
    pub fn parse(line: &[u8]) -> Result<Measurement, ParseError> {
        let end = line
            .iter()
            .rposition(|&b| b != b'\r' && b != b'\n')
            .map_or(0, |i| i + 1);
        let line = &line[..end];
        Ok(Measurement {
            temperature: field(line, "temperature", TEMPERATURE)?,
            co2: field(line, "co2", CO2)?,
            humidity: field(line, "humidity", HUMIDITY)?,
        })
    }
}

fn field<T: FromStr>(line: &[u8], name: &'static str, range: Range<usize>) -> Result<T, ParseError> {
    let bytes = line.get(range).ok_or(ParseError::Truncated {
        field: name,
        len: line.len(),
    })?;
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8 { field: name })?;
    text.trim().parse().map_err(|_| ParseError::InvalidNumber {
        field: name,
        value: text.to_string(),
    })
}

impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Temp: {}C, CO2: {}ppm, Humidity: {}%",
            self.temperature, self.co2, self.humidity
        )
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq)]
    pub enum ParseError {
        #[error("Response of {len} bytes is too short to contain the {field} field")]
        Truncated { field: &'static str, len: usize },
        #[error("The {field} field is not valid UTF-8")]
        NotUtf8 { field: &'static str },
        #[error("The {field} field is not a number. Input: {value:?}")]
        InvalidNumber { field: &'static str, value: String },
    }
}
