//! Remote file streaming for the Keel toolkit.
//!
//! This crate provides:
//!
//! - **SFTP** - buffered, seekable, cancellable file streams over an SFTP v3
//!   session, plus a session client that runs over any byte pipe
//!
//! # Features
//!
//! - `sftp` (default) - SFTP streams and client
//!
//! # Example
//!
//! ```rust
//! use keel_proto::sftp::{translate_flags, FileAccess, OpenFlags, OpenMode};
//!
//! let flags = translate_flags(OpenMode::Create, FileAccess::Write).unwrap();
//! assert!(flags.contains(OpenFlags::WRITE));
//! assert!(flags.contains(OpenFlags::CREATE_NEW_OR_OPEN | OpenFlags::TRUNCATE));
//! assert!(!flags.contains(OpenFlags::READ));
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02) - SSH File Transfer Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "sftp")]
pub mod sftp;
