//! Error types for keel

use std::fmt;

/// Unified error type for transport-level and configuration failures.
#[derive(Debug)]
pub enum KeelError {
    /// I/O error on the underlying pipe
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed or unexpected message)
    Protocol(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for KeelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeelError::Io(e) => write!(f, "IO error: {}", e),
            KeelError::Config(msg) => write!(f, "Configuration error: {}", msg),
            KeelError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            KeelError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for KeelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeelError::Io(e) => Some(e),
            KeelError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeelError {
    fn from(err: std::io::Error) -> Self {
        KeelError::Io(err)
    }
}

/// Result type for keel operations
pub type KeelResult<T> = Result<T, KeelError>;
