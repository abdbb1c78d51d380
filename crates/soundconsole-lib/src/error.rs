//! Unified error type for the soundconsole-lib crate.
//!
//! [`ConsoleError`] wraps module-specific errors (`SerialError`, `StoreError`,
//! `PlaybackError`, `GpioError`) and the `Config` kind. `From` impls allow `?`
//! to propagate across module boundaries seamlessly.

use std::fmt;

use crate::gpio::GpioError;
use crate::playback::PlaybackError;
use crate::serial::SerialError;
use crate::store::StoreError;

/// Unified error type for soundconsole-lib operations.
#[derive(Debug)]
pub enum ConsoleError {
    /// Serial link error (port open, read, write).
    Serial(SerialError),
    /// Assignment store error (mappings unreadable or malformed).
    Store(StoreError),
    /// Playback process error (spawn, kill).
    Playback(PlaybackError),
    /// GPIO backend error (channel inputs, PWM output).
    Gpio(GpioError),
    /// Standard I/O error (config persistence, bus socket).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Serial(e) => write!(f, "{e}"),
            ConsoleError::Store(e) => write!(f, "{e}"),
            ConsoleError::Playback(e) => write!(f, "{e}"),
            ConsoleError::Gpio(e) => write!(f, "{e}"),
            ConsoleError::Io(e) => write!(f, "I/O error: {e}"),
            ConsoleError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for ConsoleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsoleError::Serial(e) => Some(e),
            ConsoleError::Store(e) => Some(e),
            ConsoleError::Playback(e) => Some(e),
            ConsoleError::Gpio(e) => Some(e),
            ConsoleError::Io(e) => Some(e),
            ConsoleError::Config(_) => None,
        }
    }
}

impl From<SerialError> for ConsoleError {
    fn from(e: SerialError) -> Self {
        ConsoleError::Serial(e)
    }
}

impl From<StoreError> for ConsoleError {
    fn from(e: StoreError) -> Self {
        ConsoleError::Store(e)
    }
}

impl From<PlaybackError> for ConsoleError {
    fn from(e: PlaybackError) -> Self {
        ConsoleError::Playback(e)
    }
}

impl From<GpioError> for ConsoleError {
    fn from(e: GpioError) -> Self {
        ConsoleError::Gpio(e)
    }
}

impl From<std::io::Error> for ConsoleError {
    fn from(e: std::io::Error) -> Self {
        ConsoleError::Io(e)
    }
}

/// Crate-level Result alias using [`ConsoleError`].
pub type Result<T> = std::result::Result<T, ConsoleError>;
