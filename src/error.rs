//! Error handling for the heterodyne library.
//!
//! A single error type covers every failure a receiver pipeline can hit:
//! device open/configure/read problems, audio sink problems, command-line
//! argument problems and internal DSP faults. Every fallible operation
//! returns [`Result`]; components carry no sticky error state.

use std::io;

use thiserror::Error;

/// A specialized Result type for heterodyne operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for heterodyne operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file writes, stdout, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to open the tuner device.
    #[error("failed to open device: {0}")]
    DeviceOpen(String),

    /// The tuner rejected a configuration request.
    #[error("device configuration failed: {0}")]
    DeviceConfig(String),

    /// A read from the tuner failed or came up short.
    #[error("device read failed: {0}")]
    DeviceRead(String),

    /// An audio sink could not be opened.
    #[error("can not open '{path}' ({reason})")]
    SinkOpen { path: String, reason: String },

    /// A write to an audio sink failed.
    #[error("write failed ({0})")]
    SinkWrite(String),

    /// A command-line argument failed validation.
    #[error("Invalid argument for {0}")]
    Argument(&'static str),

    /// Internal DSP fault (non-finite state, diverged loop filter).
    #[error("internal error: {0}")]
    Internal(String),

    /// RTL-SDR backend error.
    #[cfg(feature = "rtlsdr")]
    #[error("RTL-SDR error: {0:?}")]
    RtlSdr(rtl_sdr_rs::error::RtlsdrError),
}

#[cfg(feature = "rtlsdr")]
impl From<rtl_sdr_rs::error::RtlsdrError> for Error {
    fn from(err: rtl_sdr_rs::error::RtlsdrError) -> Self {
        Error::RtlSdr(err)
    }
}

impl Error {
    /// Create a device-configuration error with a custom message.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::DeviceConfig(msg.into())
    }

    /// Create an internal error with a custom message.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }
}
