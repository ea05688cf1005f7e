//! Error types for SFTP file streams.

use super::types::{SftpError, SftpErrorCode};
use std::fmt;

/// Result type for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Stream operation that can time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Read (including the flush that precedes it)
    Read,
    /// Write, flush, or close
    Write,
}

/// Errors surfaced by [`SftpFileStream`](super::SftpFileStream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Operation not permitted by the stream's access mode
    Unsupported(&'static str),

    /// Argument rejected before contacting the remote side
    InvalidArgument(String),

    /// Failure reported by the remote session, passed through unchanged
    Remote(SftpError),

    /// The caller's cancellation token fired
    Cancelled,

    /// The configured read or write timeout elapsed
    Timeout(TimeoutKind),

    /// The stream was already closed
    Disposed,

    /// The underlying session is no longer open
    SessionClosed,
}

impl StreamError {
    /// True if the error came from the remote side.
    pub fn is_remote(&self) -> bool {
        matches!(self, StreamError::Remote(_))
    }

    /// The remote status code, if any.
    pub fn remote_code(&self) -> Option<SftpErrorCode> {
        match self {
            StreamError::Remote(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Unsupported(msg) => write!(f, "Operation not supported: {}", msg),
            StreamError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            StreamError::Remote(e) => write!(f, "{}", e),
            StreamError::Cancelled => write!(f, "Operation cancelled"),
            StreamError::Timeout(TimeoutKind::Read) => write!(f, "Read timed out"),
            StreamError::Timeout(TimeoutKind::Write) => write!(f, "Write timed out"),
            StreamError::Disposed => write!(f, "Cannot access a closed file"),
            StreamError::SessionClosed => write!(f, "SFTP session is not open"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SftpError> for StreamError {
    fn from(err: SftpError) -> Self {
        StreamError::Remote(err)
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            StreamError::Unsupported(_) => ErrorKind::Unsupported,
            StreamError::InvalidArgument(_) => ErrorKind::InvalidInput,
            StreamError::Remote(e) => match e.code {
                SftpErrorCode::NoSuchFile => ErrorKind::NotFound,
                SftpErrorCode::PermissionDenied => ErrorKind::PermissionDenied,
                SftpErrorCode::Eof => ErrorKind::UnexpectedEof,
                SftpErrorCode::NoConnection => ErrorKind::NotConnected,
                SftpErrorCode::ConnectionLost => ErrorKind::ConnectionAborted,
                SftpErrorCode::BadMessage => ErrorKind::InvalidData,
                SftpErrorCode::OpUnsupported => ErrorKind::Unsupported,
                SftpErrorCode::Ok | SftpErrorCode::Failure => ErrorKind::Other,
            },
            StreamError::Cancelled => ErrorKind::Interrupted,
            StreamError::Timeout(_) => ErrorKind::TimedOut,
            StreamError::Disposed => ErrorKind::BrokenPipe,
            StreamError::SessionClosed => ErrorKind::NotConnected,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::Unsupported("stream is not readable");
        assert_eq!(err.to_string(), "Operation not supported: stream is not readable");

        let err = StreamError::Remote(SftpError::from_code(SftpErrorCode::NoSuchFile));
        assert_eq!(err.to_string(), "SFTP error 2: No such file or directory");

        assert_eq!(StreamError::Timeout(TimeoutKind::Write).to_string(), "Write timed out");
    }

    #[test]
    fn test_timeout_is_not_cancellation() {
        assert_ne!(StreamError::Timeout(TimeoutKind::Read), StreamError::Cancelled);
    }

    #[test]
    fn test_io_error_conversion() {
        let err: std::io::Error =
            StreamError::Remote(SftpError::from_code(SftpErrorCode::PermissionDenied)).into();
        assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);

        let err: std::io::Error = StreamError::Timeout(TimeoutKind::Read).into();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

        let err: std::io::Error = StreamError::Cancelled.into();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }

    #[test]
    fn test_remote_code() {
        let err = StreamError::from(SftpError::from_code(SftpErrorCode::Failure));
        assert!(err.is_remote());
        assert_eq!(err.remote_code(), Some(SftpErrorCode::Failure));
        assert_eq!(StreamError::Disposed.remote_code(), None);
    }
}
