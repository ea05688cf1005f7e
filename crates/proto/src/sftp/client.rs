//! SFTP client implementation.
//!
//! [`SftpClient`] speaks SFTP v3 over any byte pipe: the channel of an SSH
//! `sftp` subsystem, or the stdio of a local `sftp-server` process. Replies
//! are routed back to callers by request id, so many streams can share one
//! client.

use super::config::{SftpClientConfig, READ_OVERHEAD, WRITE_OVERHEAD};
use super::logging;
use super::message::{
    init_message, parse_version, read_message, write_message, Reply, Request, SFTP_VERSION,
};
use super::session::{Handle, SessionResult, SftpSession};
use super::types::{FileAttributes, OpenFlags, SftpError, SftpErrorCode};
use async_trait::async_trait;
use bytes::Bytes;
use keel_platform::{KeelError, KeelResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<Reply>>>>;

/// State shared between the client and its background tasks.
struct Shared {
    /// Requests waiting for a reply: request id -> reply sender
    pending: PendingMap,
    /// Cleared once either direction of the pipe fails
    open: AtomicBool,
    /// Stops both background tasks
    shutdown: CancellationToken,
}

impl Shared {
    /// Marks the session dead and fails every waiting request.
    async fn close(&self, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            logging::log_session_closed(reason);
        }
        self.shutdown.cancel();
        // Dropping the senders wakes every waiter with an error.
        self.pending.lock().await.clear();
    }
}

/// SFTP client.
pub struct SftpClient {
    /// Framed requests, written in order by the writer task
    outgoing: mpsc::UnboundedSender<Bytes>,
    /// Shared session state
    shared: Arc<Shared>,
    /// Request ID counter
    next_request_id: AtomicU32,
    /// Client configuration
    config: SftpClientConfig,
    /// Version announced by the server
    server_version: u32,
}

impl SftpClient {
    /// Creates a client over a bidirectional pipe.
    ///
    /// Performs the SSH_FXP_INIT / SSH_FXP_VERSION handshake before
    /// returning.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use keel_proto::sftp::{SftpClient, SftpClientConfig};
    /// # async fn example(pipe: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
    /// let client = SftpClient::connect(pipe, SftpClientConfig::default()).await?;
    /// assert!(client.server_version() >= 3);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect<S>(io: S, config: SftpClientConfig) -> KeelResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(reader, writer, config).await
    }

    /// Creates a client from separate read and write halves, e.g. a child
    /// process's stdout and stdin.
    pub async fn from_parts<R, W>(
        mut reader: R,
        mut writer: W,
        config: SftpClientConfig,
    ) -> KeelResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;

        debug!("Initializing SFTP protocol");
        write_message(&mut writer, &init_message(config.version)).await?;

        let version_msg = read_message(&mut reader).await?;
        let server_version = parse_version(&version_msg)?;
        if server_version < SFTP_VERSION {
            return Err(KeelError::Protocol(format!(
                "Server speaks SFTP version {}, need {}",
                server_version, SFTP_VERSION
            )));
        }
        logging::log_session_open(server_version);

        let shared = Arc::new(Shared {
            pending: Arc::new(Mutex::new(HashMap::new())),
            open: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        });
        let (outgoing, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::write_loop(writer, rx, Arc::clone(&shared)));
        tokio::spawn(Self::read_loop(reader, Arc::clone(&shared)));

        Ok(Self {
            outgoing,
            shared,
            next_request_id: AtomicU32::new(1),
            config,
            server_version,
        })
    }

    /// Writes queued frames until the queue closes or the pipe fails.
    async fn write_loop<W>(
        mut writer: W,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        shared: Arc<Shared>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let frame = tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let sent = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            };
            if let Err(e) = sent.await {
                warn!("Failed to send SFTP request: {}", e);
                shared.close("write failed").await;
                return;
            }
        }

        let _ = writer.shutdown().await;
        shared.close("client shut down").await;
    }

    /// Routes replies to waiting requests until the pipe closes.
    async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        loop {
            let msg = tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                msg = read_message(&mut reader) => msg,
            };

            let routed = msg.and_then(|msg| Reply::decode(&msg));
            match routed {
                Ok((id, reply)) => {
                    let waiter = shared.pending.lock().await.remove(&id);
                    match waiter {
                        Some(tx) => {
                            if tx.send(reply).is_err() {
                                trace!("Discarding reply {} for abandoned request", id);
                            }
                        }
                        None => warn!("Reply for unknown request id {}", id),
                    }
                }
                Err(KeelError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    shared.close("server closed the session").await;
                    return;
                }
                Err(e) => {
                    warn!("Failed to receive SFTP reply: {}", e);
                    shared.close("receive failed").await;
                    return;
                }
            }
        }

        shared.close("client shut down").await;
    }

    /// Gets the next request ID.
    fn next_request_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request and waits for its reply.
    async fn request(&self, request: Request<'_>) -> SessionResult<Reply> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();

        {
            // Checked under the lock so a concurrent close cannot miss us.
            let mut pending = self.shared.pending.lock().await;
            if !self.is_open() {
                return Err(SftpError::from_code(SftpErrorCode::NoConnection));
            }
            pending.insert(id, tx);
        }

        let frame = request.encode(id).to_bytes();
        if self.outgoing.send(frame).is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(SftpError::from_code(SftpErrorCode::NoConnection));
        }

        rx.await.map_err(|_| {
            SftpError::new(
                SftpErrorCode::ConnectionLost,
                "session closed while waiting for a reply",
            )
        })
    }

    /// Returns the protocol version announced by the server.
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &SftpClientConfig {
        &self.config
    }

    /// Stops the background tasks. Outstanding and later requests fail.
    pub async fn shutdown(&self) {
        self.shared.close("client shut down").await;
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.shutdown.cancel();
    }
}

fn status_error(code: u32, message: String) -> SftpError {
    SftpError::new(
        SftpErrorCode::from_u32(code).unwrap_or(SftpErrorCode::Failure),
        message,
    )
}

fn unexpected(reply: &Reply) -> SftpError {
    SftpError::new(
        SftpErrorCode::BadMessage,
        format!("unexpected reply: {:?}", reply),
    )
}

/// Maps a reply that should be a plain status onto a result.
fn expect_ok(reply: Reply) -> SessionResult<()> {
    match reply {
        Reply::Status { code: 0, .. } => Ok(()),
        Reply::Status { code, message } => Err(status_error(code, message)),
        other => Err(unexpected(&other)),
    }
}

#[async_trait]
impl SftpSession for SftpClient {
    async fn open(&self, path: &str, flags: OpenFlags) -> SessionResult<Handle> {
        let reply = self
            .request(Request::Open {
                path,
                flags,
                attrs: FileAttributes::new(),
            })
            .await?;
        match reply {
            Reply::Handle(handle) => Ok(Handle::new(handle)),
            Reply::Status { code, message } => Err(status_error(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    async fn read_at(&self, handle: &Handle, offset: u64, len: u32) -> SessionResult<Bytes> {
        let reply = self
            .request(Request::Read {
                handle: handle.as_bytes(),
                offset,
                len,
            })
            .await?;
        match reply {
            Reply::Data(data) => Ok(data),
            Reply::Status { code, .. } if code == SftpErrorCode::Eof as u32 => Ok(Bytes::new()),
            Reply::Status { code, message } => Err(status_error(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    async fn write_at(&self, handle: &Handle, offset: u64, data: &[u8]) -> SessionResult<()> {
        let reply = self
            .request(Request::Write {
                handle: handle.as_bytes(),
                offset,
                data,
            })
            .await?;
        expect_ok(reply)
    }

    async fn close(&self, handle: &Handle) -> SessionResult<()> {
        let reply = self
            .request(Request::Close {
                handle: handle.as_bytes(),
            })
            .await?;
        expect_ok(reply)
    }

    async fn stat_length(&self, handle: &Handle) -> SessionResult<u64> {
        let reply = self
            .request(Request::FStat {
                handle: handle.as_bytes(),
            })
            .await?;
        match reply {
            Reply::Attrs(attrs) => attrs.size.ok_or_else(|| {
                SftpError::new(SftpErrorCode::Failure, "server did not report a file size")
            }),
            Reply::Status { code, message } => Err(status_error(code, message)),
            other => Err(unexpected(&other)),
        }
    }

    fn optimal_read_length(&self, hint: u32) -> u32 {
        hint.min(self.config.local_max_packet_size)
            .saturating_sub(READ_OVERHEAD)
            .max(1)
    }

    fn optimal_write_length(&self, hint: u32, handle: &Handle) -> u32 {
        hint.min(self.config.remote_max_packet_size)
            .saturating_sub(WRITE_OVERHEAD + handle.len() as u32)
            .max(1)
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}
