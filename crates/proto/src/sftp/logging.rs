//! Structured logging for SFTP streams and sessions
//!
//! # Log Levels
//!
//! - **TRACE**: Reads served from the read-ahead buffer
//! - **DEBUG**: Remote read/write requests, seeks
//! - **INFO**: Streams opened and closed, session lifecycle
//! - **WARN**: Best-effort cleanup that failed
//!
//! # Example
//!
//! ```no_run
//! use keel_proto::sftp::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("keel_proto::sftp=debug")
//!     .init();
//!
//! logging::log_session_closed("reader reached end of stream");
//! ```

use super::session::Handle;
use super::types::OpenFlags;
use tracing::{debug, info, trace, warn};

/// Log a stream being opened
pub fn log_stream_open(
    path: &str,
    handle: &Handle,
    flags: OpenFlags,
    read_buffer: u32,
    write_buffer: u32,
) {
    info!(
        path = path,
        handle = %handle,
        flags = %flags,
        read_buffer = read_buffer,
        write_buffer = write_buffer,
        "SFTP stream opened"
    );
}

/// Log a stream being closed
pub fn log_stream_close(handle: &Handle, position: u64) {
    info!(handle = %handle, position = position, "SFTP stream closed");
}

/// Log a read request sent to the remote side
pub fn log_remote_read(handle: &Handle, offset: u64, requested: u32, received: usize) {
    debug!(
        handle = %handle,
        offset = offset,
        requested = requested,
        received = received,
        "remote read"
    );
}

/// Log a write request sent to the remote side
pub fn log_remote_write(handle: &Handle, offset: u64, len: usize) {
    debug!(handle = %handle, offset = offset, len = len, "remote write");
}

/// Log a read served from the read-ahead buffer
pub fn log_buffer_hit(handle: &Handle, offset: u64, len: usize) {
    trace!(handle = %handle, offset = offset, len = len, "read-ahead hit");
}

/// Log a seek
pub fn log_seek(handle: &Handle, from: u64, to: u64) {
    debug!(handle = %handle, from = from, to = to, "seek");
}

/// Log a failed cleanup that cannot be reported to a caller
pub fn log_cleanup_failure(operation: &str, handle: &Handle, error: &dyn std::fmt::Display) {
    warn!(
        operation = operation,
        handle = %handle,
        error = %error,
        "SFTP cleanup failed"
    );
}

/// Log a session handshake
pub fn log_session_open(server_version: u32) {
    info!(server_version = server_version, "SFTP session initialized");
}

/// Log the session becoming unusable
pub fn log_session_closed(reason: &str) {
    info!(reason = reason, "SFTP session closed");
}
