use std::fmt;

/// Result type alias for rceload core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rceload core operations
///
/// Per-event delivery failures are not errors; they are reported as
/// `DeliveryOutcome`s. An `Error` aborts the operation that returned it.
#[derive(Debug)]
pub enum Error {
    /// I/O errors from transport layer
    Io(std::io::Error),

    /// Distribution parameters rejected before generation
    InvalidSpec(String),

    /// Connection errors
    Connection(String),

    /// Protocol errors
    Protocol(String),

    /// Configuration errors
    Config(String),

    /// Other errors
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::InvalidSpec(msg) => write!(f, "Invalid distribution spec: {msg}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<rceload_transport::Error> for Error {
    fn from(err: rceload_transport::Error) -> Self {
        match err {
            rceload_transport::Error::Io(e) => Error::Io(e),
            rceload_transport::Error::Connection(msg) => Error::Connection(msg),
            rceload_transport::Error::Config(msg) => Error::Config(msg),
            rceload_transport::Error::Other(msg) => Error::Other(msg),
        }
    }
}

impl From<rceload_protocols::DecodeError> for Error {
    fn from(err: rceload_protocols::DecodeError) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<rceload_protocols::HttpError> for Error {
    fn from(err: rceload_protocols::HttpError) -> Self {
        match err {
            rceload_protocols::HttpError::Url(msg) => Error::Config(msg),
            other => Error::Protocol(other.to_string()),
        }
    }
}
