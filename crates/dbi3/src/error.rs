//! Error types for the DBI3 tool.
//!
//! Per-item failures (one catalog line, one download, one conversion) are
//! contained and logged by the component that hit them. Only missing
//! directories and bad configuration reach the caller as fatal errors; see
//! [`Error::is_fatal`].

use std::path::PathBuf;
use thiserror::Error;

use crate::timestamp::CodecError;

/// The main error type for DBI3 operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Device Errors ===
    /// No DBI3 serial port is attached.
    #[error("DBI3 not present: {reason}")]
    DeviceNotPresent {
        /// Why the device was considered absent.
        reason: String,
    },

    /// More than one port matched the DBI3 USB identity.
    #[error("cannot select a DBI3 port, several match: {}", ports.join(", "))]
    AmbiguousDevice {
        /// The candidate port names.
        ports: Vec<String>,
    },

    /// The device did not answer a command in time.
    #[error("no response to '{command}' from DBI3")]
    ProtocolTimeout {
        /// The command that went unanswered.
        command: String,
    },

    /// The device answered with something the protocol does not allow.
    #[error("unexpected response to '{command}': '{response}'")]
    UnexpectedResponse {
        /// The command that was sent.
        command: String,
        /// What came back.
        response: String,
    },

    /// The device client has been closed.
    #[error("device connection is closed")]
    DeviceClosed,

    /// The serial port layer failed.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A log name from the device could not be decoded.
    #[error("invalid log name: {0}")]
    InvalidLogName(#[from] CodecError),

    /// A serial number that cannot name a log directory.
    #[error("invalid serial number '{serial}'")]
    InvalidSerial {
        /// The serial number as received.
        serial: String,
    },

    // === Conversion Errors ===
    /// A single log could not be converted.
    #[error("cannot convert {path}: {reason}")]
    Conversion {
        /// The raw log or override file at fault.
        path: PathBuf,
        /// Description of what went wrong.
        reason: String,
    },

    // === Filesystem Errors ===
    /// A directory the run depends on does not exist.
    #[error("required directory {path} does not exist")]
    FilesystemUnavailable {
        /// The missing directory.
        path: PathBuf,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV output failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A specialized Result type for DBI3 operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a protocol timeout for the given command.
    #[must_use]
    pub fn timeout(command: impl Into<String>) -> Self {
        Self::ProtocolTimeout {
            command: command.into(),
        }
    }

    /// Create an unexpected response error.
    #[must_use]
    pub fn unexpected(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            command: command.into(),
            response: response.into(),
        }
    }

    /// Create a conversion error for one log.
    #[must_use]
    pub fn conversion(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a device-not-present error.
    #[must_use]
    pub fn not_present(reason: impl Into<String>) -> Self {
        Self::DeviceNotPresent {
            reason: reason.into(),
        }
    }

    /// Check if this error means the device is simply absent.
    #[must_use]
    pub fn is_device_not_present(&self) -> bool {
        matches!(self, Self::DeviceNotPresent { .. })
    }

    /// Check if this error is a protocol timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ProtocolTimeout { .. })
    }

    /// Check if this error must halt the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FilesystemUnavailable { .. }
                | Self::DirectoryCreate { .. }
                | Self::ConfigLoad(_)
                | Self::ConfigValidation { .. }
        )
    }
}
