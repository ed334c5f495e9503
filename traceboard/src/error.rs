//! Error types for traceboard.

use std::io;
use thiserror::Error;

/// Result type for traceboard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for traceboard operations.
///
/// Only fatal conditions are represented here. A quiet device or a noisy
/// response line is not an error: the worker reports those as an unavailable
/// measurement and keeps cycling.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on an open link (device unplugged, OS-level failure).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port could not be opened.
    #[error("Cannot open {port}: {source}")]
    Connection {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// I/O attempted while no port is open.
    #[error("Serial port is not open")]
    NotConnected,

    /// Text that is not a command token.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Deadline elapsed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The worker outcome was already collected by an earlier call.
    #[error("Worker already joined")]
    AlreadyJoined,

    /// The worker thread panicked.
    #[error("Worker thread panicked")]
    WorkerPanicked,

    /// No serial device could be found.
    #[error("No serial device found")]
    DeviceNotFound,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the link to the device could not be
    /// established or was lost.
    pub fn is_link_failure(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection { .. } | Self::NotConnected | Self::DeviceNotFound => {
                true
            },
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
