//! Wire protocol of the sensor board.
//!
//! The protocol is line/token oriented and has three message kinds:
//!
//! | Direction | Form                 | Example  |
//! |-----------|----------------------|----------|
//! | out       | heartbeat `Thh:mm`   | `T14:15` |
//! | out       | command `R` + 5 digits | `R00001` |
//! | in        | whitespace-separated response line | `ADC 2048 ...` |
//!
//! Outbound messages carry no terminator. A response only counts as a
//! measurement when it has more tokens than the noise threshold; the
//! measurement is then its second token, passed through verbatim.

use {
    crate::error::Error,
    chrono::NaiveTime,
    std::{fmt, str::FromStr},
};

/// Reference noise threshold: lines with this many tokens or fewer are garbage.
pub const DEFAULT_NOISE_THRESHOLD: usize = 300;

/// Measurement text published when no valid reading was extracted.
pub const UNAVAILABLE: &str = "N/A";

/// Length of a command token (`R` + 5 digits).
const COMMAND_TOKEN_LEN: usize = 6;

/// Format the heartbeat for wall-clock `time`: `T` + zero-padded `hh:mm`.
///
/// Seconds are dropped; the device has no field for them.
pub fn heartbeat(time: NaiveTime) -> String {
    time.format("T%H:%M").to_string()
}

/// Extract the measurement from one response line.
///
/// Returns the second whitespace-separated token if the line has more than
/// `noise_threshold` tokens, otherwise [`Measurement::Unavailable`].
pub fn parse_measurement(line: &str, noise_threshold: usize) -> Measurement {
    if line.split_whitespace().count() <= noise_threshold {
        return Measurement::Unavailable;
    }
    line.split_whitespace()
        .nth(1)
        .map_or(Measurement::Unavailable, |token| {
            Measurement::Value(token.to_string())
        })
}

/// Device command.
///
/// The worker treats commands as opaque tokens; the named variants exist for
/// callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(into = "String"))]
pub enum Command {
    /// `R00001`: read the sensor (ADC) value.
    ReadSensor,
    /// `R00002`: timer control.
    TimerControl,
    /// `R00003`: buzzer / real-time control.
    BuzzerControl,
    /// `R00004`: reset the device.
    Reset,
    /// `R00005`: request the device time.
    RequestTime,
    /// Any other token, sent as is.
    Custom(String),
}

impl Command {
    /// All named commands.
    pub const NAMED: [Self; 5] = [
        Self::ReadSensor,
        Self::TimerControl,
        Self::BuzzerControl,
        Self::Reset,
        Self::RequestTime,
    ];

    /// Command carrying `token` without validation.
    pub fn custom(token: impl Into<String>) -> Self {
        Self::Custom(token.into())
    }

    /// Wire token.
    pub fn token(&self) -> &str {
        match self {
            Self::ReadSensor => "R00001",
            Self::TimerControl => "R00002",
            Self::BuzzerControl => "R00003",
            Self::Reset => "R00004",
            Self::RequestTime => "R00005",
            Self::Custom(token) => token,
        }
    }

    /// Short operator-facing name, if the command is a named one.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::ReadSensor => Some("adc"),
            Self::TimerControl => Some("timer"),
            Self::BuzzerControl => Some("buzzer"),
            Self::Reset => Some("reset"),
            Self::RequestTime => Some("time"),
            Self::Custom(_) => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.token().to_string()
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Accepts a command name (`adc`, `timer`, `buzzer`, `reset`, `time`,
    /// case-insensitive) or an `R` + 5 digit token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(named) = Self::NAMED
            .into_iter()
            .find(|c| c.token() == s || c.name().is_some_and(|n| n.eq_ignore_ascii_case(s)))
        {
            return Ok(named);
        }

        let is_token = s.len() == COMMAND_TOKEN_LEN
            && s.starts_with('R')
            && s[1..].bytes().all(|b| b.is_ascii_digit());
        if is_token {
            Ok(Self::Custom(s.to_string()))
        } else {
            Err(Error::InvalidCommand(s.to_string()))
        }
    }
}

/// Measurement of one duty cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(into = "String"))]
pub enum Measurement {
    /// Token extracted from a valid response.
    Value(String),
    /// No response, or the response was line noise.
    Unavailable,
}

impl Measurement {
    /// The measurement text, `N/A` when unavailable.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Value(value) => value,
            Self::Unavailable => UNAVAILABLE,
        }
    }

    /// Whether a value was extracted.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Measurement> for String {
    fn from(measurement: Measurement) -> Self {
        measurement.as_str().to_string()
    }
}

/// One published `(time label, measurement)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Reading {
    /// Heartbeat sent in the cycle that produced this reading (`Thh:mm`).
    pub time_label: String,
    /// Extracted measurement or the unavailable sentinel.
    pub measurement: Measurement,
}

impl Reading {
    /// Create a reading.
    pub fn new(time_label: impl Into<String>, measurement: Measurement) -> Self {
        Self {
            time_label: time_label.into(),
            measurement,
        }
    }

    /// Time label without the leading `T` (`hh:mm`).
    pub fn clock_text(&self) -> &str {
        self.time_label
            .strip_prefix('T')
            .unwrap_or(&self.time_label)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.clock_text(), self.measurement)
    }
}
