//! The remote session port a file stream talks through.

use super::types::{OpenFlags, SftpError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Result of a remote session request.
pub type SessionResult<T> = Result<T, SftpError>;

/// Opaque identifier of a file opened on the remote side.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Handle(Bytes);

impl Handle {
    /// Wraps raw handle bytes as returned by SSH_FXP_HANDLE.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw handle bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Handle length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length handle.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Asynchronous file operations offered by an SFTP session.
///
/// Implementations may be shared by many streams. They are not required to
/// serialize requests that belong to the same handle; the stream issues them
/// one at a time. Dropping a returned future abandons the request.
#[async_trait]
pub trait SftpSession: Send + Sync {
    /// Opens `path` with the given protocol flags.
    async fn open(&self, path: &str, flags: OpenFlags) -> SessionResult<Handle>;

    /// Reads up to `len` bytes at `offset`. A shorter (possibly empty)
    /// result means the end of the file was reached.
    async fn read_at(&self, handle: &Handle, offset: u64, len: u32) -> SessionResult<Bytes>;

    /// Writes `data` at `offset`.
    async fn write_at(&self, handle: &Handle, offset: u64, data: &[u8]) -> SessionResult<()>;

    /// Closes the handle.
    async fn close(&self, handle: &Handle) -> SessionResult<()>;

    /// Current size of the open file.
    async fn stat_length(&self, handle: &Handle) -> SessionResult<u64>;

    /// Best read request size for a caller-provided buffer size hint.
    fn optimal_read_length(&self, hint: u32) -> u32;

    /// Best write request size for a caller-provided buffer size hint.
    fn optimal_write_length(&self, hint: u32, handle: &Handle) -> u32;

    /// Whether the underlying session is still usable.
    fn is_open(&self) -> bool;
}
