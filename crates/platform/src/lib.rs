//! # Keel Platform
//!
//! Shared types and utilities for the keel crates.
//!
//! This crate provides:
//! - Unified error types (`KeelError`, `KeelResult`)
//! - Process-wide crypto helpers ([`crypto`])
//!
//! # Examples
//!
//! ```
//! use keel_platform::{KeelError, KeelResult};
//!
//! fn check_packet_size(size: u32) -> KeelResult<u32> {
//!     if size < 64 {
//!         return Err(KeelError::Config("packet size too small".to_string()));
//!     }
//!     Ok(size)
//! }
//!
//! # fn main() -> KeelResult<()> {
//! assert_eq!(check_packet_size(32768)?, 32768);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod crypto;
pub mod error;

pub use error::{KeelError, KeelResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
