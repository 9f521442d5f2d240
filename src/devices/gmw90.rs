//! Session setup for the Vaisala GMW90 air quality meter.
//!
//! The meter has no acknowledgement protocol on its service connection. Whatever it has printed
//! before we attached is still queued, and the first measurement after a reboot is missing its
//! leading `>`. The session is therefore synchronised purely by waiting and by draining input.
use crate::{
    device::{serial, LineDevice, Port},
    error::DeviceError,
    protocol::Command,
};
use log::{debug, info};
use serialport::ClearBuffer;
use std::time::Duration;
use tokio::time::sleep;
use tokio_serial::SerialStream;

/// Baud rate of the service connection. For the GMW90 it is 19.2 KBd
pub const BAUD_RATE: u32 = 19200;

/// Upper bound for reading a single response line.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause that lets the device settle between steps.
const SETTLE_TIME: Duration = Duration::from_secs(1);

/// Time the device needs to reboot after `reset`.
const REBOOT_TIME: Duration = Duration::from_secs(5);

/// Open the meter at `path` and bring it into a state where measurements can be read reliably.
pub async fn open(path: &str) -> Result<LineDevice<SerialStream>, DeviceError> {
    info!("Opening {} at {} Bd", path, BAUD_RATE);
    let device = serial::open(path, BAUD_RATE, READ_TIMEOUT)?;
    initialize(device).await
}

/// Bring a freshly opened meter into a known state.
///
/// Blocks for roughly ten seconds. The returned device answers every `send` with exactly one
/// well aligned measurement line.
pub async fn initialize<P: Port>(mut device: LineDevice<P>) -> Result<LineDevice<P>, DeviceError> {
    device.clear(ClearBuffer::All)?;

    sleep(SETTLE_TIME).await;
    device.write(Command::Wake.as_bytes()).await?;
    sleep(SETTLE_TIME).await;

    let stale = device.drain().await?;
    debug!("Discarded {} stale lines", stale);

    sleep(SETTLE_TIME).await;
    device.clear(ClearBuffer::Output)?;
    debug!("Resetting device");
    device.write(Command::Reset.as_bytes()).await?;
    sleep(REBOOT_TIME).await;

    let chatter = device.drain().await?;
    debug!("Discarded {} lines printed during reboot", chatter);

    // The first measurement after a reset lacks its '>' marker and is misaligned. Throw it away.
    device.write(Command::Send.as_bytes()).await?;
    let first = device.read_line().await?;
    debug!("Discarded first measurement {:?}", String::from_utf8_lossy(&first));
    sleep(SETTLE_TIME).await;

    info!("Device ready");
    Ok(device)
}
