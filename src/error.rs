//! Custom error types for the generator control layer.
//!
//! `GeneratorError` is the single error type returned by the library. Every
//! variant is recovered at the boundary of the operation that raised it and
//! turned into a user-visible message; nothing is retried automatically and
//! the serial connection is left open after any failure.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the serial port could not be claimed (in use, missing,
//!   permission denied). Raised before any command is sent.
//! - **`NotConnected`**: a write or query was attempted while the transport is
//!   closed. Raised before anything is sent.
//! - **`Parse`**: ARB point text contained a token that is not a number. The
//!   whole batch is rejected before any command is sent.
//! - **`EmptyWaveform`**: ARB text held no points at all.
//! - **`TransportWrite`**: a write failed part-way through an apply or upload
//!   sequence. The instrument may be partially configured.
//! - **`Io`**: any other I/O failure on the serial stream.
//! - **`Config`**: configuration could not be loaded or failed validation.
//! - **`WorkerClosed`**: the background worker is no longer accepting requests.

use thiserror::Error;

/// Convenience alias for results using the generator error type.
pub type GenResult<T> = std::result::Result<T, GeneratorError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Failed to open serial port '{port}': {reason}")]
    Connection { port: String, reason: String },

    #[error("Serial port is not open")]
    NotConnected,

    #[error("Invalid ARB point '{token}': expected a number")]
    Parse { token: String },

    #[error("ARB waveform contains no points")]
    EmptyWaveform,

    #[error("Write of '{command}' failed, instrument may be partially configured: {source}")]
    TransportWrite {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generator worker has shut down")]
    WorkerClosed,
}

impl GeneratorError {
    /// Whether the instrument may hold partially applied state after this error.
    #[must_use]
    pub fn leaves_partial_state(&self) -> bool {
        matches!(self, GeneratorError::TransportWrite { .. })
    }
}

impl From<figment::Error> for GeneratorError {
    fn from(value: figment::Error) -> Self {
        GeneratorError::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_names_port() {
        let err = GeneratorError::Connection {
            port: "COM7".into(),
            reason: "Access is denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("COM7"));
        assert!(msg.contains("Access is denied"));
    }

    #[test]
    fn only_write_failures_leave_partial_state() {
        let write = GeneratorError::TransportWrite {
            command: "DATA:ARB VOLATILE,0.000000".into(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert!(write.leaves_partial_state());
        assert!(!GeneratorError::NotConnected.leaves_partial_state());
        assert!(!GeneratorError::Parse { token: "x".into() }.leaves_partial_state());
    }

    #[test]
    fn parse_error_shows_token() {
        let err = GeneratorError::Parse { token: "1.2.3".into() };
        assert_eq!(err.to_string(), "Invalid ARB point '1.2.3': expected a number");
    }
}
