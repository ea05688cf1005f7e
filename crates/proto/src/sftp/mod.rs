//! SFTP (SSH File Transfer Protocol) file streams.
//!
//! This module provides [`SftpFileStream`], a buffered random-access stream
//! over one remote file, and [`SftpClient`], an SFTP v3 session that speaks
//! the wire protocol over any byte pipe.
//!
//! # Architecture
//!
//! A stream only talks to the [`SftpSession`] trait:
//! 1. Translate the open intent into SSH_FXP_OPEN flags
//! 2. Open the remote handle and size the buffers
//! 3. Turn reads, writes and seeks into READ/WRITE requests
//! 4. Flush and close the handle exactly once
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |                               |
//!   |-- SSH_FXP_WRITE ------------->|  (write-behind buffer full)
//!   |<- SSH_FXP_STATUS -------------|
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|  (read-ahead miss)
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_proto::sftp::{
//!     FileAccess, OpenMode, SftpClient, SftpClientConfig, SftpFileStream, StreamConfig,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let pipe: tokio::io::DuplexStream = unimplemented!();
//! let client = Arc::new(SftpClient::connect(pipe, SftpClientConfig::default()).await?);
//! let cancel = CancellationToken::new();
//!
//! let mut stream = SftpFileStream::open(
//!     client,
//!     "/remote/file.txt",
//!     OpenMode::Open,
//!     FileAccess::Read,
//!     &StreamConfig::default(),
//!     &cancel,
//! )
//! .await?;
//!
//! let mut contents = Vec::new();
//! stream.read_to_end(&mut contents, &cancel).await?;
//! stream.close(&cancel).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - Most common version

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod flags;
pub mod logging;
pub mod message;
pub mod session;
pub mod stream;
pub mod types;

pub use client::SftpClient;
pub use config::{SftpClientConfig, StreamConfig, DEFAULT_BUFFER_SIZE};
pub use error::{StreamError, StreamResult, TimeoutKind};
pub use flags::{translate_flags, FileAccess, OpenMode};
pub use message::{SftpMessage, SftpMessageType};
pub use session::{Handle, SessionResult, SftpSession};
pub use stream::{FileStream, SftpFileStream, StreamState};
pub use types::{FileAttributes, OpenFlags, SftpError, SftpErrorCode};
