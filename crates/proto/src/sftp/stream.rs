//! Buffered, seekable, cancellable stream over one remote file handle.
//!
//! # Buffering
//!
//! ```text
//!   caller                SftpFileStream                    SftpSession
//!     |                         |                                |
//!     |-- write(a) ------------>| buffered (write-behind)        |
//!     |-- write(b) ------------>| buffer full ------------------>| WRITE @0
//!     |-- seek(0) ------------->| flush tail ------------------->| WRITE @n
//!     |-- read(buf) ----------->| miss ------------------------->| READ @0
//!     |<------------------------| surplus kept (read-ahead)      |
//!     |-- read(buf) ----------->| hit                            |
//!     |-- close() ------------->| -------------------------------->| CLOSE
//! ```
//!
//! Every operation stages its buffer and position changes and commits them
//! only after the last remote request of the operation succeeded. A
//! cancelled, timed out, failed or dropped call leaves the stream as it was.
//!
//! A stream is not meant to be used from several tasks at once; all methods
//! that can issue requests take `&mut self`.

use super::buffer::{ReadAhead, WriteBehind, WriteChunk};
use super::config::StreamConfig;
use super::error::{StreamError, StreamResult, TimeoutKind};
use super::flags::{translate_flags, FileAccess, OpenMode};
use super::logging;
use super::session::{Handle, SftpSession};
use async_trait::async_trait;
use std::future::Future;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Handle open, all operations allowed
    Open,
    /// Close request in flight
    Closing,
    /// Handle released; every operation fails with [`StreamError::Disposed`]
    Closed,
}

/// Minimal capability interface of a random-access remote file stream.
#[async_trait]
pub trait FileStream: Send {
    /// True if the stream was opened with read access.
    fn can_read(&self) -> bool;

    /// True if the stream was opened with write access.
    fn can_write(&self) -> bool;

    /// True if the stream supports seeking.
    fn can_seek(&self) -> bool;

    /// True if the stream honours read and write timeouts.
    fn can_timeout(&self) -> bool;

    /// Reads into `buf`, returning the number of bytes read. Zero means end
    /// of file.
    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize>;

    /// Writes all of `buf` at the current position.
    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> StreamResult<()>;

    /// Moves the position, returning the new absolute offset.
    async fn seek(&mut self, pos: SeekFrom, cancel: &CancellationToken) -> StreamResult<u64>;

    /// Sends buffered writes to the remote side.
    async fn flush(&mut self, cancel: &CancellationToken) -> StreamResult<()>;

    /// Flushes and releases the remote handle.
    async fn close(&mut self, cancel: &CancellationToken) -> StreamResult<()>;

    /// Current logical position.
    fn position(&self) -> StreamResult<u64>;

    /// Current length of the remote file.
    async fn length(&mut self, cancel: &CancellationToken) -> StreamResult<u64>;
}

/// Runs `fut` under an optional time limit.
async fn with_timeout<T, F>(limit: Option<Duration>, kind: TimeoutKind, fut: F) -> StreamResult<T>
where
    F: Future<Output = StreamResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StreamError::Timeout(kind))?,
        None => fut.await,
    }
}

/// Runs `fut` until it completes, `cancel` fires or `limit` elapses.
///
/// An already fired token wins without polling `fut`, so no request is
/// sent.
async fn run_guarded<T, F>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    kind: TimeoutKind,
    fut: F,
) -> StreamResult<T>
where
    F: Future<Output = StreamResult<T>>,
{
    let guarded = async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            result = fut => result,
        }
    };
    with_timeout(limit, kind, guarded).await
}

/// Applies a signed delta to an offset, rejecting results outside `u64`.
fn offset_by(base: u64, delta: i64) -> StreamResult<u64> {
    base.checked_add_signed(delta).ok_or_else(|| {
        StreamError::InvalidArgument(format!(
            "seek from {} by {} leaves the file bounds",
            base, delta
        ))
    })
}

/// Closes a handle the caller will never see.
async fn release_handle(session: &Arc<dyn SftpSession>, handle: &Handle) {
    if let Err(e) = session.close(handle).await {
        logging::log_cleanup_failure("close", handle, &e);
    }
}

/// A buffered stream over a remote file opened through an [`SftpSession`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use keel_proto::sftp::*;
/// # use tokio_util::sync::CancellationToken;
/// # async fn example(session: Arc<dyn SftpSession>) -> Result<(), StreamError> {
/// let cancel = CancellationToken::new();
/// let mut stream = SftpFileStream::open(
///     session,
///     "/tmp/report.txt",
///     OpenMode::Create,
///     FileAccess::Write,
///     &StreamConfig::default(),
///     &cancel,
/// )
/// .await?;
///
/// stream.write(b"quarterly numbers\n", &cancel).await?;
/// stream.close(&cancel).await?;
/// # Ok(())
/// # }
/// ```
pub struct SftpFileStream {
    session: Arc<dyn SftpSession>,
    handle: Handle,
    path: String,
    access: FileAccess,
    position: u64,
    read_buffer_size: u32,
    write_buffer_size: u32,
    read_ahead: ReadAhead,
    write_behind: WriteBehind,
    state: StreamState,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl SftpFileStream {
    /// Opens `path` on the remote side.
    ///
    /// `Append` streams start at the current end of the file. The OPEN
    /// request always runs to completion; if `cancel` fires meanwhile, the
    /// new handle is closed again and [`StreamError::Cancelled`] is returned.
    pub async fn open(
        session: Arc<dyn SftpSession>,
        path: &str,
        mode: OpenMode,
        access: FileAccess,
        config: &StreamConfig,
        cancel: &CancellationToken,
    ) -> StreamResult<Self> {
        config.validate()?;
        let flags = translate_flags(mode, access)?;
        if !session.is_open() {
            return Err(StreamError::SessionClosed);
        }

        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        // Not raced against `cancel`: once OPEN is sent the handle must be
        // seen so it can be released.
        let handle = session.open(path, flags).await?;

        let position = if mode == OpenMode::Append {
            let length = run_guarded(cancel, None, TimeoutKind::Read, async {
                Ok(session.stat_length(&handle).await?)
            })
            .await;
            match length {
                Ok(length) => length,
                Err(e) => {
                    release_handle(&session, &handle).await;
                    return Err(e);
                }
            }
        } else {
            0
        };

        if cancel.is_cancelled() {
            release_handle(&session, &handle).await;
            return Err(StreamError::Cancelled);
        }

        let read_buffer_size = session.optimal_read_length(config.buffer_size).max(1);
        let write_buffer_size = session
            .optimal_write_length(config.buffer_size, &handle)
            .max(1);
        logging::log_stream_open(path, &handle, flags, read_buffer_size, write_buffer_size);

        Ok(Self {
            session,
            handle,
            path: path.to_string(),
            access,
            position,
            read_buffer_size,
            write_buffer_size,
            read_ahead: ReadAhead::Empty,
            write_behind: WriteBehind::Empty,
            state: StreamState::Open,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    /// Remote path this stream was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Remote handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Size of every remote read request.
    pub fn read_buffer_size(&self) -> u32 {
        self.read_buffer_size
    }

    /// Capacity of the write-behind buffer.
    pub fn write_buffer_size(&self) -> u32 {
        self.write_buffer_size
    }

    /// True if the stream was opened with read access.
    pub fn can_read(&self) -> bool {
        self.access.can_read()
    }

    /// True if the stream was opened with write access.
    pub fn can_write(&self) -> bool {
        self.access.can_write()
    }

    /// Always true.
    pub fn can_seek(&self) -> bool {
        true
    }

    /// Always true.
    pub fn can_timeout(&self) -> bool {
        true
    }

    /// Time limit for read and length calls.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Sets the time limit for read and length calls.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Time limit for write, seek, flush and close calls.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Sets the time limit for write, seek, flush and close calls.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Current logical position. Never contacts the remote side.
    pub fn position(&self) -> StreamResult<u64> {
        self.ensure_usable()?;
        Ok(self.position)
    }

    fn ensure_usable(&self) -> StreamResult<()> {
        if self.state != StreamState::Open {
            return Err(StreamError::Disposed);
        }
        if !self.session.is_open() {
            return Err(StreamError::SessionClosed);
        }
        Ok(())
    }

    /// Issues `chunks` in order. Nothing is committed here.
    async fn send_chunks(&self, chunks: &[WriteChunk], caller: &[u8]) -> StreamResult<()> {
        for chunk in chunks {
            let bytes = chunk.bytes(caller);
            self.session
                .write_at(&self.handle, chunk.offset, bytes)
                .await?;
            logging::log_remote_write(&self.handle, chunk.offset, bytes.len());
        }
        Ok(())
    }

    /// Sends the write-behind buffer, if any. The caller commits `Empty`.
    async fn flush_pending(&self) -> StreamResult<()> {
        match self.write_behind.flush_chunk() {
            Some(chunk) => self.send_chunks(std::slice::from_ref(&chunk), &[]).await,
            None => Ok(()),
        }
    }

    async fn read_staged(&self, buf: &mut [u8]) -> StreamResult<(usize, ReadAhead)> {
        self.flush_pending().await?;

        let mut position = self.position;
        let (mut filled, mut read_ahead) = self.read_ahead.serve(position, buf);
        if filled > 0 {
            logging::log_buffer_hit(&self.handle, position, filled);
            position += filled as u64;
        }

        while filled < buf.len() {
            let chunk = self
                .session
                .read_at(&self.handle, position, self.read_buffer_size)
                .await?;
            logging::log_remote_read(&self.handle, position, self.read_buffer_size, chunk.len());
            if chunk.is_empty() {
                read_ahead = ReadAhead::Empty;
                break;
            }

            let n = (buf.len() - filled).min(chunk.len());
            buf[filled..filled + n].copy_from_slice(&chunk[..n]);
            filled += n;
            position += n as u64;
            read_ahead = ReadAhead::filled(position, chunk.slice(n..));

            // Short read: end of file for now.
            if chunk.len() < self.read_buffer_size as usize {
                break;
            }
        }

        Ok((filled, read_ahead))
    }

    /// Reads into `buf`, returning the number of bytes read.
    ///
    /// Pending writes are flushed first. Bytes are served from the
    /// read-ahead buffer when it covers the position; otherwise full
    /// `read_buffer_size` requests are issued until `buf` is filled or the
    /// end of file is reached, and the unused tail of the last reply is kept.
    /// Returns 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize> {
        self.ensure_usable()?;
        if !self.can_read() {
            return Err(StreamError::Unsupported("stream does not support reading"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let (n, read_ahead) =
            run_guarded(cancel, self.read_timeout, TimeoutKind::Read, self.read_staged(buf))
                .await?;

        self.write_behind = WriteBehind::Empty;
        self.read_ahead = read_ahead;
        self.position += n as u64;
        Ok(n)
    }

    /// Reads until end of file, appending to `out`.
    pub async fn read_to_end(
        &mut self,
        out: &mut Vec<u8>,
        cancel: &CancellationToken,
    ) -> StreamResult<usize> {
        let mut chunk = vec![0u8; self.read_buffer_size as usize];
        let mut total = 0;
        loop {
            let n = self.read(&mut chunk, cancel).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Writes all of `buf` at the current position.
    ///
    /// Small sequential writes accumulate in the write-behind buffer and go
    /// out as one request once `write_buffer_size` bytes are pending. A write
    /// that does not continue the buffered range flushes it first.
    pub async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> StreamResult<()> {
        self.ensure_usable()?;
        if !self.can_write() {
            return Err(StreamError::Unsupported("stream does not support writing"));
        }
        if buf.is_empty() {
            return Ok(());
        }
        let end = self.position.checked_add(buf.len() as u64).ok_or_else(|| {
            StreamError::InvalidArgument(format!(
                "writing {} bytes at {} overflows the file offset",
                buf.len(),
                self.position
            ))
        })?;
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let capacity = self.write_buffer_size as usize;
        if self.write_behind.can_absorb(self.position, buf.len(), capacity) {
            self.write_behind.absorb(self.position, buf);
        } else {
            let plan = self.write_behind.plan(self.position, buf, capacity);
            run_guarded(
                cancel,
                self.write_timeout,
                TimeoutKind::Write,
                self.send_chunks(&plan.chunks, buf),
            )
            .await?;
            self.write_behind = plan.remainder;
        }

        self.read_ahead = ReadAhead::Empty;
        self.position = end;
        Ok(())
    }

    /// Moves the position, returning the new absolute offset.
    ///
    /// Pending writes are flushed and the read-ahead buffer is dropped.
    /// Seeking past the end of the file is allowed; seeking before its
    /// start fails with [`StreamError::InvalidArgument`].
    pub async fn seek(&mut self, pos: SeekFrom, cancel: &CancellationToken) -> StreamResult<u64> {
        self.ensure_usable()?;

        let (target, from_end) = match pos {
            SeekFrom::Start(offset) => (Some(offset), 0),
            SeekFrom::Current(delta) => (Some(offset_by(self.position, delta)?), 0),
            SeekFrom::End(delta) => (None, delta),
        };

        let this = &*self;
        let target = run_guarded(cancel, self.write_timeout, TimeoutKind::Write, async {
            this.flush_pending().await?;
            match target {
                Some(target) => Ok(target),
                None => {
                    let length = this.session.stat_length(&this.handle).await?;
                    offset_by(length, from_end)
                }
            }
        })
        .await?;

        logging::log_seek(&self.handle, self.position, target);
        self.write_behind = WriteBehind::Empty;
        self.read_ahead = ReadAhead::Empty;
        self.position = target;
        Ok(target)
    }

    /// Sends buffered writes to the remote side. A no-op when nothing is
    /// pending.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> StreamResult<()> {
        self.ensure_usable()?;
        if self.write_behind.is_empty() {
            return Ok(());
        }

        run_guarded(
            cancel,
            self.write_timeout,
            TimeoutKind::Write,
            self.flush_pending(),
        )
        .await?;
        self.write_behind = WriteBehind::Empty;
        Ok(())
    }

    /// Current length of the remote file, including pending writes.
    pub async fn length(&mut self, cancel: &CancellationToken) -> StreamResult<u64> {
        self.ensure_usable()?;

        let this = &*self;
        let length = run_guarded(cancel, self.read_timeout, TimeoutKind::Read, async {
            this.flush_pending().await?;
            Ok(this.session.stat_length(&this.handle).await?)
        })
        .await?;

        self.write_behind = WriteBehind::Empty;
        Ok(length)
    }

    async fn close_handle(&self) -> StreamResult<()> {
        self.session.close(&self.handle).await?;
        Ok(())
    }

    fn mark_closed(&mut self) {
        self.state = StreamState::Closed;
        self.read_ahead = ReadAhead::Empty;
        self.write_behind = WriteBehind::Empty;
        logging::log_stream_close(&self.handle, self.position);
    }

    /// Flushes pending writes and closes the remote handle.
    ///
    /// Closing twice is a no-op. If the flush is cancelled or times out the
    /// stream stays open so the caller can retry. With nothing buffered a
    /// fired `cancel` does not stop the close. Once the close request has
    /// been sent the stream ends up closed even if the request fails; the
    /// first error is returned. The close request itself is bounded by the
    /// write timeout but not by `cancel`.
    pub async fn close(&mut self, cancel: &CancellationToken) -> StreamResult<()> {
        if self.state != StreamState::Open {
            return Ok(());
        }
        if !self.session.is_open() {
            let lost = !self.write_behind.is_empty();
            self.mark_closed();
            return if lost {
                Err(StreamError::SessionClosed)
            } else {
                Ok(())
            };
        }

        let flushed = if self.write_behind.is_empty() {
            Ok(())
        } else {
            run_guarded(
                cancel,
                self.write_timeout,
                TimeoutKind::Write,
                self.flush_pending(),
            )
            .await
        };
        if let Err(StreamError::Cancelled | StreamError::Timeout(_)) = flushed {
            return flushed;
        }

        self.state = StreamState::Closing;
        let closed = with_timeout(self.write_timeout, TimeoutKind::Write, self.close_handle()).await;
        self.mark_closed();

        flushed.and(closed)
    }
}

impl std::fmt::Debug for SftpFileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFileStream")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .field("access", &self.access)
            .field("position", &self.position)
            .field("state", &self.state)
            .field("read_ahead", &self.read_ahead.len())
            .field("write_behind", &self.write_behind.len())
            .finish()
    }
}

#[async_trait]
impl FileStream for SftpFileStream {
    fn can_read(&self) -> bool {
        SftpFileStream::can_read(self)
    }

    fn can_write(&self) -> bool {
        SftpFileStream::can_write(self)
    }

    fn can_seek(&self) -> bool {
        SftpFileStream::can_seek(self)
    }

    fn can_timeout(&self) -> bool {
        SftpFileStream::can_timeout(self)
    }

    async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> StreamResult<usize> {
        SftpFileStream::read(self, buf, cancel).await
    }

    async fn write(&mut self, buf: &[u8], cancel: &CancellationToken) -> StreamResult<()> {
        SftpFileStream::write(self, buf, cancel).await
    }

    async fn seek(&mut self, pos: SeekFrom, cancel: &CancellationToken) -> StreamResult<u64> {
        SftpFileStream::seek(self, pos, cancel).await
    }

    async fn flush(&mut self, cancel: &CancellationToken) -> StreamResult<()> {
        SftpFileStream::flush(self, cancel).await
    }

    async fn close(&mut self, cancel: &CancellationToken) -> StreamResult<()> {
        SftpFileStream::close(self, cancel).await
    }

    fn position(&self) -> StreamResult<u64> {
        SftpFileStream::position(self)
    }

    async fn length(&mut self, cancel: &CancellationToken) -> StreamResult<u64> {
        SftpFileStream::length(self, cancel).await
    }
}

impl Drop for SftpFileStream {
    fn drop(&mut self) {
        if self.state != StreamState::Open {
            return;
        }
        self.state = StreamState::Closed;
        if !self.session.is_open() {
            return;
        }

        let session = Arc::clone(&self.session);
        let handle = self.handle.clone();
        let pending = std::mem::take(&mut self.write_behind).flush_chunk();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(chunk) = pending {
                        if let Err(e) = session.write_at(&handle, chunk.offset, chunk.bytes(&[])).await {
                            logging::log_cleanup_failure("flush", &handle, &e);
                        }
                    }
                    release_handle(&session, &handle).await;
                });
            }
            Err(_) => {
                warn!(
                    handle = %self.handle,
                    pending = pending.map_or(0, |chunk| chunk.len()),
                    "SFTP stream dropped outside a tokio runtime; remote handle left open"
                );
            }
        }
    }
}
