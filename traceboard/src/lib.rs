//! # traceboard
//!
//! Host-side supervisory client for a microcontroller sensor board attached
//! over a serial link.
//!
//! A [`Worker`] runs a fixed duty cycle on a background thread:
//!
//! - sends a wall-clock heartbeat (`Thh:mm`) to the board
//! - dispatches at most one queued [`Command`] (`R00001`..`R00005`)
//! - reads one response line and extracts a [`Measurement`]
//! - publishes a [`Reading`] on a channel that never blocks the loop
//!
//! Link failures are fatal: the port is closed and the worker reports why it
//! stopped. Timeouts and noisy lines only produce an `N/A` reading.
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for readings and events
//!
//! ## Example
//!
//! ```rust,no_run
//! use traceboard::{ConnectionManager, Worker, WorkerConfig, WorkerEvent};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = traceboard::auto_detect_port()?;
//!     let config = WorkerConfig::new(port.name, 115200).with_max_cycles(10);
//!
//!     let worker = Worker::new(ConnectionManager::native(), config);
//!     worker.sender().read_sensor();
//!
//!     let (_handle, events) = worker.start()?;
//!     for event in events {
//!         match event {
//!             WorkerEvent::Reading(reading) => println!("{reading}"),
//!             WorkerEvent::Stopped(reason) => println!("stopped: {reason}"),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod connection;
pub mod device;
pub mod error;
pub mod port;
pub mod protocol;
pub mod worker;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort, NativePortEnumerator};
pub use {
    clock::{Clock, FixedClock, SystemClock},
    connection::ConnectionManager,
    device::{
        DetectedPort, DeviceKind, auto_detect_port, detect_known_ports, detect_ports,
        format_port_list, select_preferred,
    },
    error::{Error, Result},
    port::{DEFAULT_BAUD_RATE, Port, PortEnumerator, PortInfo, PortOpener, SerialConfig},
    protocol::{Command, Measurement, Reading, heartbeat, parse_measurement},
    worker::{
        CommandQueue, CommandSender, StopReason, Worker, WorkerConfig, WorkerEvent, WorkerHandle,
        WorkerState,
    },
};
