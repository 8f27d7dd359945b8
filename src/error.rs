//! Error handling for the realtime core

use std::fmt;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Realtime core error types
#[derive(Debug, Clone)]
pub enum RelayError {
    /// Network-related errors
    Network(String),
    /// Frame-level corruption: bad magic bytes or an impossible declared length.
    /// Fatal for the connection that produced it.
    MalformedFrame(String),
    /// Payload-level protocol errors (truncated fields, invalid UTF-8, oversized strings)
    Protocol(String),
    /// Connection errors
    Connection(String),
    /// Direct-message store errors
    Storage(String),
    /// Configuration error
    Config(String),
    /// Timeout error
    Timeout(String),
    /// Resource limit exceeded
    ResourceLimit(String),
}

impl RelayError {
    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        RelayError::Network(msg.into())
    }

    /// Create a malformed-frame error
    pub fn malformed_frame<T: Into<String>>(msg: T) -> Self {
        RelayError::MalformedFrame(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        RelayError::Protocol(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        RelayError::Connection(msg.into())
    }

    /// Create a storage error
    pub fn storage<T: Into<String>>(msg: T) -> Self {
        RelayError::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        RelayError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        RelayError::Timeout(msg.into())
    }

    /// Create a resource limit error
    pub fn resource_limit<T: Into<String>>(msg: T) -> Self {
        RelayError::ResourceLimit(msg.into())
    }

    /// Whether this error must terminate the connection that produced it.
    ///
    /// A malformed frame leaves the inbound byte stream unsynchronized, so
    /// recovery is impossible; payload-level errors only poison one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::MalformedFrame(_))
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Network(msg) => write!(f, "Network error: {}", msg),
            RelayError::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RelayError::Connection(msg) => write!(f, "Connection error: {}", msg),
            RelayError::Storage(msg) => write!(f, "Storage error: {}", msg),
            RelayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RelayError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            RelayError::ResourceLimit(msg) => write!(f, "Resource limit exceeded: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Network(format!("IO error: {}", err))
    }
}
