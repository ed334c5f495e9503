//! Serial connection management.
//!
//! [`ConnectionManager`] owns the single physical handle of a link. Opening is
//! idempotent, closing is always safe, and the handle is released when the
//! manager is dropped, so every exit path of its owner closes the port.

use {
    crate::{
        error::{Error, Result},
        port::{DEFAULT_BAUD_RATE, Port, PortOpener, SerialConfig},
    },
    log::{debug, info, trace, warn},
    std::{
        io::{ErrorKind, Read},
        time::{Duration, Instant},
    },
};

#[cfg(feature = "native")]
use crate::port::NativeOpener;

/// Size of a single read from the port.
const READ_CHUNK: usize = 256;

/// Owns and serializes all access to one serial handle.
pub struct ConnectionManager<O: PortOpener> {
    opener: O,
    port: Option<O::Port>,
    /// Bytes received past the last returned line terminator.
    pending: Vec<u8>,
}

#[cfg(feature = "native")]
impl ConnectionManager<NativeOpener> {
    /// Manager for native serial ports.
    pub fn native() -> Self {
        Self::new(NativeOpener)
    }
}

impl<O: PortOpener> ConnectionManager<O> {
    /// Create a closed manager that opens ports through `opener`.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            port: None,
            pending: Vec::new(),
        }
    }

    /// Open `port` at `baud` with the default line settings.
    pub fn open(&mut self, port: &str, baud: u32) -> Result<()> {
        self.open_with(&SerialConfig::new(port, baud))
    }

    /// Open the port described by `config`.
    ///
    /// Does nothing if a port is already open.
    pub fn open_with(&mut self, config: &SerialConfig) -> Result<()> {
        if let Some(port) = &self.port {
            debug!("{} already open", port.name());
            return Ok(());
        }

        let port = self
            .opener
            .open(config)
            .map_err(|e| Error::Connection {
                port: config.port_name.clone(),
                source: Box::new(e),
            })?;
        info!(
            "Serial port {} opened at {} baud",
            port.name(),
            port.baud_rate()
        );
        self.port = Some(port);
        self.pending.clear();
        Ok(())
    }

    /// Whether a port is currently open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Name of the open port.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_ref().map(Port::name)
    }

    /// Baud rate of the open port, or the default when closed.
    pub fn baud_rate(&self) -> u32 {
        self.port
            .as_ref()
            .map_or(DEFAULT_BAUD_RATE, Port::baud_rate)
    }

    /// Release the handle if open. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.pending.clear();
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                warn!("Error while closing {}: {e}", port.name());
            }
            info!("Serial port {} closed", port.name());
        }
    }

    /// Write `bytes` exactly as given; no terminator is appended.
    pub fn write_line(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        trace!("TX {:?}", String::from_utf8_lossy(bytes));
        port.write_all_bytes(bytes)
    }

    /// Read one line, waiting at most `timeout` for its terminator.
    ///
    /// The terminator (`\n`, optionally preceded by `\r`) is stripped. If the
    /// window elapses first, whatever arrived is returned, possibly nothing.
    /// The port is read at least once, so a zero `timeout` polls whatever
    /// the device already sent.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(line) = take_line(&mut self.pending) {
            return Ok(line);
        }

        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if port.timeout() != remaining {
                port.set_timeout(remaining)?;
            }

            match port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    trace!("RX {:?}", String::from_utf8_lossy(&chunk[..n]));
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = take_line(&mut self.pending) {
                        return Ok(line);
                    }
                    // Past the deadline, keep draining only while reads fill the chunk
                    if n < READ_CHUNK && Instant::now() >= deadline {
                        break;
                    }
                },
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        break;
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        let partial = std::mem::take(&mut self.pending);
        if !partial.is_empty() {
            debug!("Read window elapsed with {} unterminated bytes", partial.len());
        }
        Ok(partial)
    }
}

impl<O: PortOpener> Drop for ConnectionManager<O> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Split the first complete line off `buffer`.
fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}
