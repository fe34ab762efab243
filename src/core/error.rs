use std::io;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors raised by the mount, focuser and bridge components
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("Serial link failure: {0}")]
    LinkFailure(String),

    #[error("Checksum did not match (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Mount rejected command: {0}")]
    ProtocolNack(String),

    #[error("Socket error: {0}")]
    SocketBind(String),

    #[error("Unknown command received of length {0}")]
    MalformedTelegram(usize),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new link-unavailable error
    pub fn link_unavailable(msg: impl Into<String>) -> Self {
        Error::LinkUnavailable(msg.into())
    }

    /// Creates a new link-failure error
    pub fn link_failure(msg: impl Into<String>) -> Self {
        Error::LinkFailure(msg.into())
    }

    /// Creates a new NACK error for the given command frame
    pub fn nack(command: impl Into<String>) -> Self {
        Error::ProtocolNack(command.into())
    }

    /// Creates a new socket bind error
    pub fn socket_bind(msg: impl Into<String>) -> Self {
        Error::SocketBind(msg.into())
    }

    /// Creates a new coordinate parsing error
    pub fn coordinate(msg: impl Into<String>) -> Self {
        Error::InvalidCoordinate(msg.into())
    }

    /// Creates a new invalid command error
    pub fn command(msg: impl Into<String>) -> Self {
        Error::InvalidCommand(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new task error
    pub fn task(msg: impl Into<String>) -> Self {
        Error::Task(msg.into())
    }

    /// Whether the error means the serial link has to be reopened
    pub fn is_link_error(&self) -> bool {
        matches!(self, Error::LinkUnavailable(_) | Error::LinkFailure(_))
    }
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => Error::Io(e),
            LinesCodecError::MaxLineLengthExceeded => Error::command("Calibration line too long"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::nack("!AFrn;");
        assert!(matches!(err, Error::ProtocolNack(_)));
        assert_eq!(err.to_string(), "Mount rejected command: !AFrn;");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_line_codec_conversion() {
        let err: Error = LinesCodecError::MaxLineLengthExceeded.into();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[test]
    fn test_checksum_display() {
        let err = Error::ChecksumMismatch { expected: 0x4a, actual: 0x00 };
        assert!(err.to_string().starts_with("Checksum did not match"));
    }

    #[test]
    fn test_link_classification() {
        assert!(Error::link_failure("gone").is_link_error());
        assert!(Error::link_unavailable("busy").is_link_error());
        assert!(!Error::MalformedTelegram(3).is_link_error());
    }
}
