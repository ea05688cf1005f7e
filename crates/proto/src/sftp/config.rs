//! Stream and session configuration.

use super::error::{StreamError, StreamResult};
use super::message::SFTP_VERSION;
use keel_platform::{KeelError, KeelResult};
use std::time::Duration;

/// Default buffer size hint (32 KiB).
pub const DEFAULT_BUFFER_SIZE: u32 = 32 * 1024;

/// Bytes of every SSH_FXP_DATA reply that are not file data
/// (length, type, request id, data length).
pub const READ_OVERHEAD: u32 = 13;

/// Bytes of every SSH_FXP_WRITE request that are not file data, excluding
/// the handle itself (length, type, request id, handle length, offset, data
/// length).
pub const WRITE_OVERHEAD: u32 = 25;

/// Configuration for an [`SftpFileStream`](super::SftpFileStream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Upper bound hint for the read and write buffers.
    pub buffer_size: u32,
    /// Time limit for a single read call.
    pub read_timeout: Option<Duration>,
    /// Time limit for a single write, flush or close call.
    pub write_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl StreamConfig {
    /// Creates a default stream configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer size hint.
    pub fn with_buffer_size(mut self, size: u32) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> StreamResult<()> {
        if self.buffer_size == 0 {
            return Err(StreamError::InvalidArgument(
                "buffer size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for an [`SftpClient`](super::SftpClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpClientConfig {
    /// Largest packet we accept from the server.
    pub local_max_packet_size: u32,
    /// Largest packet the server accepts from us.
    pub remote_max_packet_size: u32,
    /// Protocol version offered in SSH_FXP_INIT.
    pub version: u32,
}

impl Default for SftpClientConfig {
    fn default() -> Self {
        Self {
            local_max_packet_size: 64 * 1024,
            remote_max_packet_size: 32 * 1024,
            version: SFTP_VERSION,
        }
    }
}

impl SftpClientConfig {
    /// Creates a default client configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local maximum packet size.
    pub fn with_local_max_packet_size(mut self, size: u32) -> Self {
        self.local_max_packet_size = size;
        self
    }

    /// Sets the remote maximum packet size.
    pub fn with_remote_max_packet_size(mut self, size: u32) -> Self {
        self.remote_max_packet_size = size;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> KeelResult<()> {
        if self.version != SFTP_VERSION {
            return Err(KeelError::Config(format!(
                "unsupported SFTP version {} (only {} is implemented)",
                self.version, SFTP_VERSION
            )));
        }
        if self.local_max_packet_size <= READ_OVERHEAD {
            return Err(KeelError::Config(format!(
                "local max packet size must exceed {} bytes",
                READ_OVERHEAD
            )));
        }
        // Leave room for a handle of at least a few bytes.
        if self.remote_max_packet_size <= WRITE_OVERHEAD + 256 {
            return Err(KeelError::Config(format!(
                "remote max packet size must exceed {} bytes",
                WRITE_OVERHEAD + 256
            )));
        }
        Ok(())
    }
}
