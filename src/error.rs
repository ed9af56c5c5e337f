//! Error handling for the ESS control service
//!
//! A single service-wide error enum. Message-carrying variants cover the
//! broad failure classes (configuration, I/O, protocol, timeout, meter);
//! unit variants exist for conditions callers match on, such as the
//! VE.Bus "not supported" replies and a missing ESS assistant.

use thiserror::Error;

/// ESS control service error type
#[derive(Error, Debug)]
pub enum EssrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial or network input/output errors
    #[error("IO error: {0}")]
    Io(String),

    /// VE.Bus framing and command errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Energy meter errors
    #[error("Meter error: {0}")]
    Meter(String),

    /// Operation aborted by shutdown signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Device replied 0x90: the requested RAM variable does not exist
    #[error("Variable not supported")]
    VariableNotSupported,

    /// Device replied 0x91: the requested setting does not exist
    #[error("Setting not supported")]
    SettingNotSupported,

    /// RAM slot scan finished without finding the ESS assistant record
    #[error("ESS assistant RAM record not found")]
    EssNotFound,
}

/// Result type alias for the ESS control service
pub type Result<T> = std::result::Result<T, EssrvError>;

impl EssrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        EssrvError::Config(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        EssrvError::Io(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        EssrvError::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        EssrvError::Timeout(msg.into())
    }

    pub fn meter(msg: impl Into<String>) -> Self {
        EssrvError::Meter(msg.into())
    }

    /// True for the conditions a clean shutdown produces.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EssrvError::Cancelled)
    }
}

impl From<std::io::Error> for EssrvError {
    fn from(err: std::io::Error) -> Self {
        EssrvError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for EssrvError {
    fn from(err: tokio_serial::Error) -> Self {
        EssrvError::Io(format!("serial: {err}"))
    }
}

impl From<reqwest::Error> for EssrvError {
    fn from(err: reqwest::Error) -> Self {
        EssrvError::Meter(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EssrvError::protocol("checksum mismatch");
        assert_eq!(err.to_string(), "Protocol error: checksum mismatch");

        let err = EssrvError::SettingNotSupported;
        assert_eq!(err.to_string(), "Setting not supported");
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(EssrvError::Cancelled.is_cancellation());
        assert!(!EssrvError::io("broken pipe").is_cancellation());
        assert!(!EssrvError::EssNotFound.is_cancellation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such device");
        let err: EssrvError = io_err.into();
        assert!(matches!(err, EssrvError::Io(_)));
    }
}
