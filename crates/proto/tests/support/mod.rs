//! Test doubles shared by the SFTP integration tests.
//!
//! - [`MemoryFs`]: files and open handles kept in memory, with SFTP v3 open
//!   semantics
//! - [`RecordingSession`]: an `SftpSession` over a `MemoryFs` that records
//!   every request and can stall, fail or go offline on demand
//! - [`spawn_responder`]: an SFTP v3 server over `tokio::io::duplex`

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use keel_proto::sftp::message::{
    read_message, version_message, write_message, Reply, Request, SftpMessageType,
};
use keel_proto::sftp::{
    FileAttributes, Handle, OpenFlags, SessionResult, SftpError, SftpErrorCode, SftpSession,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Installs a tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keel_proto=debug")
        .with_test_writer()
        .try_init();
}

/// In-memory files and handles.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<Vec<u8>, String>,
    next_handle: u32,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn path_of(&self, handle: &[u8]) -> SessionResult<&String> {
        self.handles
            .get(handle)
            .ok_or_else(|| SftpError::new(SftpErrorCode::Failure, "invalid handle"))
    }

    pub fn open(&mut self, path: &str, flags: OpenFlags) -> SessionResult<Vec<u8>> {
        let exists = self.files.contains_key(path);
        if flags.contains(OpenFlags::CREATE_NEW) && exists {
            return Err(SftpError::new(SftpErrorCode::Failure, "file already exists"));
        }
        if !exists {
            if !flags.contains(OpenFlags::CREATE_NEW_OR_OPEN) {
                return Err(SftpError::from_code(SftpErrorCode::NoSuchFile));
            }
            self.files.insert(path.to_string(), Vec::new());
        }
        if flags.contains(OpenFlags::TRUNCATE) {
            if let Some(data) = self.files.get_mut(path) {
                data.clear();
            }
        }

        self.next_handle += 1;
        let handle = format!("handle-{}", self.next_handle).into_bytes();
        self.handles.insert(handle.clone(), path.to_string());
        Ok(handle)
    }

    pub fn read(&self, handle: &[u8], offset: u64, len: u32) -> SessionResult<Vec<u8>> {
        let data = &self.files[self.path_of(handle)?];
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    pub fn write(&mut self, handle: &[u8], offset: u64, bytes: &[u8]) -> SessionResult<()> {
        let path = self.path_of(handle)?.clone();
        let data = self.files.entry(path).or_default();
        let start = offset as usize;
        if data.len() < start + bytes.len() {
            data.resize(start + bytes.len(), 0);
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn close(&mut self, handle: &[u8]) -> SessionResult<()> {
        self.handles
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| SftpError::new(SftpErrorCode::Failure, "invalid handle"))
    }

    pub fn len(&self, handle: &[u8]) -> SessionResult<u64> {
        Ok(self.files[self.path_of(handle)?].len() as u64)
    }
}

/// A request seen by [`RecordingSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open { path: String, flags: OpenFlags },
    Read { offset: u64, len: u32 },
    Write { offset: u64, data: Vec<u8> },
    Close,
    StatLength,
}

/// In-memory `SftpSession` that records the requests it receives.
#[derive(Default)]
pub struct RecordingSession {
    fs: Mutex<MemoryFs>,
    calls: Mutex<Vec<Call>>,
    offline: AtomicBool,
    stall: AtomicBool,
    stall_call: Mutex<Option<usize>>,
    cancel_on_success: Mutex<Option<CancellationToken>>,
    fail_next: Mutex<Option<SftpError>>,
    completed: AtomicUsize,
    read_length: Option<u32>,
    write_length: Option<u32>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the optimal read and write lengths regardless of the hint.
    pub fn with_lengths(read: u32, write: u32) -> Self {
        Self {
            read_length: Some(read),
            write_length: Some(write),
            ..Self::default()
        }
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.fs.lock().unwrap().put(path, data);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().unwrap().get(path)
    }

    pub fn open_handles(&self) -> usize {
        self.fs.lock().unwrap().open_handles()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Requests that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While set, requests are recorded and then never answered.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Stalls only the request with this zero-based index.
    pub fn stall_call(&self, index: usize) {
        *self.stall_call.lock().unwrap() = Some(index);
    }

    /// Fires `token` as soon as the next request succeeds.
    pub fn cancel_on_success(&self, token: CancellationToken) {
        *self.cancel_on_success.lock().unwrap() = Some(token);
    }

    /// Fails the next request with `error`.
    pub fn fail_next(&self, error: SftpError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    async fn enter(&self, call: Call) -> SessionResult<()> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls.len() - 1
        };
        let stall = self.stall.load(Ordering::SeqCst)
            || *self.stall_call.lock().unwrap() == Some(index);
        if stall {
            std::future::pending::<()>().await;
        }
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn finish<T>(&self, result: SessionResult<T>) -> SessionResult<T> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if result.is_ok() {
            if let Some(token) = self.cancel_on_success.lock().unwrap().take() {
                token.cancel();
            }
        }
        result
    }
}

#[async_trait]
impl SftpSession for RecordingSession {
    async fn open(&self, path: &str, flags: OpenFlags) -> SessionResult<Handle> {
        self.enter(Call::Open {
            path: path.to_string(),
            flags,
        })
        .await?;
        let result = self.fs.lock().unwrap().open(path, flags).map(Handle::new);
        self.finish(result)
    }

    async fn read_at(&self, handle: &Handle, offset: u64, len: u32) -> SessionResult<Bytes> {
        self.enter(Call::Read { offset, len }).await?;
        let result = self
            .fs
            .lock()
            .unwrap()
            .read(handle.as_bytes(), offset, len)
            .map(Bytes::from);
        self.finish(result)
    }

    async fn write_at(&self, handle: &Handle, offset: u64, data: &[u8]) -> SessionResult<()> {
        self.enter(Call::Write {
            offset,
            data: data.to_vec(),
        })
        .await?;
        let result = self.fs.lock().unwrap().write(handle.as_bytes(), offset, data);
        self.finish(result)
    }

    async fn close(&self, handle: &Handle) -> SessionResult<()> {
        self.enter(Call::Close).await?;
        let result = self.fs.lock().unwrap().close(handle.as_bytes());
        self.finish(result)
    }

    async fn stat_length(&self, handle: &Handle) -> SessionResult<u64> {
        self.enter(Call::StatLength).await?;
        let result = self.fs.lock().unwrap().len(handle.as_bytes());
        self.finish(result)
    }

    fn optimal_read_length(&self, hint: u32) -> u32 {
        self.read_length.unwrap_or(hint)
    }

    fn optimal_write_length(&self, hint: u32, _handle: &Handle) -> u32 {
        self.write_length.unwrap_or(hint)
    }

    fn is_open(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

fn status_reply(result: SessionResult<()>) -> Reply {
    match result {
        Ok(()) => Reply::status(SftpErrorCode::Ok),
        Err(e) => Reply::Status {
            code: e.code as u32,
            message: e.message,
        },
    }
}

fn answer(fs: &mut MemoryFs, request: Request<'_>) -> Reply {
    let result = match request {
        Request::Open { path, flags, .. } => fs.open(path, flags).map(|h| Reply::Handle(h.into())),
        Request::Read {
            handle,
            offset,
            len,
        } => fs.read(handle, offset, len).map(|data| {
            if data.is_empty() {
                Reply::status(SftpErrorCode::Eof)
            } else {
                Reply::Data(data.into())
            }
        }),
        Request::Write {
            handle,
            offset,
            data,
        } => return status_reply(fs.write(handle, offset, data)),
        Request::Close { handle } => return status_reply(fs.close(handle)),
        Request::FStat { handle } => fs.len(handle).map(|size| {
            Reply::Attrs(FileAttributes {
                size: Some(size),
                ..FileAttributes::default()
            })
        }),
    };
    result.unwrap_or_else(|e| status_reply(Err(e)))
}

/// Starts an SFTP v3 server over an in-memory pipe and returns the client end.
pub fn spawn_responder(fs: Arc<Mutex<MemoryFs>>) -> tokio::io::DuplexStream {
    spawn_slow_responder(fs, Duration::ZERO)
}

/// Like [`spawn_responder`], but answers OPEN only after `open_delay`. The
/// file is opened before the delay starts.
pub fn spawn_slow_responder(
    fs: Arc<Mutex<MemoryFs>>,
    open_delay: Duration,
) -> tokio::io::DuplexStream {
    let (client, mut server) = tokio::io::duplex(256 * 1024);

    tokio::spawn(async move {
        let init = read_message(&mut server).await.unwrap();
        assert_eq!(init.msg_type, SftpMessageType::Init);
        write_message(&mut server, &version_message(3)).await.unwrap();

        while let Ok(msg) = read_message(&mut server).await {
            let (id, request) = Request::decode(&msg).unwrap();
            let is_open = matches!(request, Request::Open { .. });
            let reply = answer(&mut fs.lock().unwrap(), request);
            if is_open && !open_delay.is_zero() {
                tokio::time::sleep(open_delay).await;
            }
            if write_message(&mut server, &reply.encode(id)).await.is_err() {
                break;
            }
        }
    });

    client
}
