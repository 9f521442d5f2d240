//! Line oriented IO devices to exchange commands and responses with.
use crate::error::DeviceError;
use bytes::BytesMut;
use log::trace;
use serialport::ClearBuffer;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// Byte transport underneath a [`LineDevice`].
///
/// Besides reading and writing, the port has to report how many bytes are waiting in its input
/// queue and be able to discard its queues.
pub trait Port: AsyncRead + AsyncWrite + Unpin + Send {
    fn bytes_to_read(&self) -> std::io::Result<u32>;

    fn clear(&self, buffer: ClearBuffer) -> std::io::Result<()>;
}

/// Handle on a device speaking newline terminated text.
///
/// The handle owns its port exclusively. Bytes read past the end of a line stay in an internal
/// buffer and are returned by the next call to [`LineDevice::read_line`].
pub struct LineDevice<P> {
    port: P,
    buffer: BytesMut,
    timeout: Duration,
}

impl<P: Port> LineDevice<P> {
    pub fn new(port: P, timeout: Duration) -> LineDevice<P> {
        LineDevice {
            port,
            // Allocate buffer with 256 bytes
            buffer: BytesMut::with_capacity(256),
            timeout,
        }
    }

    /// Write all of `data` to the device.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        trace!("Writing {:?}", String::from_utf8_lossy(data));
        self.port.write_all(data).await?;
        self.port.flush().await?;
        Ok(())
    }

    /// Read one line including its terminator.
    ///
    /// If no newline arrives within the read timeout, whatever was received so far is returned,
    /// which may be empty. A closed stream is reported as [`DeviceError::ConnectionLost`].
    pub async fn read_line(&mut self) -> Result<BytesMut, DeviceError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(i) = self.buffer.iter().position(|&b| b == b'\n') {
                return Ok(self.buffer.split_to(i + 1));
            }

            match timeout_at(deadline, self.port.read_buf(&mut self.buffer)).await {
                Err(_) => {
                    trace!("Read timed out with {} bytes pending", self.buffer.len());
                    return Ok(self.buffer.split());
                }
                Ok(Ok(0)) => return Err(DeviceError::ConnectionLost),
                Ok(Ok(_)) => (),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Number of received bytes not yet returned by [`LineDevice::read_line`].
    pub fn bytes_available(&self) -> Result<usize, DeviceError> {
        Ok(self.buffer.len() + self.port.bytes_to_read()? as usize)
    }

    /// Discard the given queues. Clearing the input also drops buffered partial lines.
    pub fn clear(&mut self, buffer: ClearBuffer) -> Result<(), DeviceError> {
        if matches!(buffer, ClearBuffer::Input | ClearBuffer::All) {
            self.buffer.clear();
        }
        self.port.clear(buffer)?;
        Ok(())
    }

    /// Read and discard lines as long as input is available. Returns the number of discarded
    /// lines.
    pub async fn drain(&mut self) -> Result<usize, DeviceError> {
        let mut count = 0;
        while self.bytes_available()? > 0 {
            let line = self.read_line().await?;
            trace!("Discarding {:?}", String::from_utf8_lossy(&line));
            count += 1;
        }
        Ok(count)
    }
}

/// Serial devices such as USB
pub mod serial {
    use super::{LineDevice, Port};
    use crate::error::DeviceError;
    use serialport::ClearBuffer;
    use std::time::Duration;
    use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

    impl Port for SerialStream {
        fn bytes_to_read(&self) -> std::io::Result<u32> {
            Ok(SerialPort::bytes_to_read(self)?)
        }

        fn clear(&self, buffer: ClearBuffer) -> std::io::Result<()> {
            Ok(SerialPort::clear(self, buffer)?)
        }
    }

    /// Open the serial device at `path` with the given baud rate.
    ///
    /// Reads on the async stream are not bounded by the port settings, `timeout` is enforced by
    /// [`LineDevice::read_line`].
    pub fn open(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<LineDevice<SerialStream>, DeviceError> {
        let port = tokio_serial::new(path, baud_rate)
            .open_native_async()
            .map_err(|source| DeviceError::Open {
                path: path.to_string(),
                source,
            })?;
        Ok(LineDevice::new(port, timeout))
    }
}

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum DeviceError {
        #[error("Failed to open device {path}: {source}")]
        Open {
            path: String,
            source: tokio_serial::Error,
        },
        #[error("IO error on device: {0}")]
        Io(#[from] std::io::Error),
        #[error("Connection lost to device")]
        ConnectionLost,
    }
}
