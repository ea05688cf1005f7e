//! Process-wide crypto helpers.
//!
//! Thin factories over vetted primitives (`rand`, `sha1`, `sha2`, `hmac`).
//! The random generator is constructed lazily on first use and lives for the
//! rest of the process.

use crate::{KeelError, KeelResult};
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Mutex;

/// HMAC-SHA1
pub type HmacSha1 = Hmac<Sha1>;
/// HMAC-SHA256
pub type HmacSha256 = Hmac<Sha256>;
/// HMAC-SHA384
pub type HmacSha384 = Hmac<Sha384>;
/// HMAC-SHA512
pub type HmacSha512 = Hmac<Sha512>;

static RANDOMIZER: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

/// Returns `len` cryptographically strong random bytes.
pub fn generate_random(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    fill_random(&mut data);
    data
}

/// Fills `data` with cryptographically strong random bytes.
pub fn fill_random(data: &mut [u8]) {
    // A poisoned lock still holds a usable generator.
    let mut rng = RANDOMIZER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    rng.fill_bytes(data);
}

/// Creates a SHA-1 digest.
pub fn create_sha1() -> Sha1 {
    Sha1::new()
}

/// Creates a SHA-256 digest.
pub fn create_sha256() -> Sha256 {
    Sha256::new()
}

/// Creates a SHA-384 digest.
pub fn create_sha384() -> Sha384 {
    Sha384::new()
}

/// Creates a SHA-512 digest.
pub fn create_sha512() -> Sha512 {
    Sha512::new()
}

fn invalid_key() -> KeelError {
    KeelError::Config("invalid HMAC key length".to_string())
}

/// Creates an HMAC-SHA1 keyed with `key`.
pub fn create_hmac_sha1(key: &[u8]) -> KeelResult<HmacSha1> {
    HmacSha1::new_from_slice(key).map_err(|_| invalid_key())
}

/// Creates an HMAC-SHA256 keyed with `key`.
pub fn create_hmac_sha256(key: &[u8]) -> KeelResult<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|_| invalid_key())
}

/// Creates an HMAC-SHA384 keyed with `key`.
pub fn create_hmac_sha384(key: &[u8]) -> KeelResult<HmacSha384> {
    HmacSha384::new_from_slice(key).map_err(|_| invalid_key())
}

/// Creates an HMAC-SHA512 keyed with `key`.
pub fn create_hmac_sha512(key: &[u8]) -> KeelResult<HmacSha512> {
    HmacSha512::new_from_slice(key).map_err(|_| invalid_key())
}

/// HMAC whose tag is cut down to the leading `output_len` bytes
/// (e.g. `hmac-sha1-96`).
pub struct TruncatedHmac<M> {
    inner: M,
    output_len: usize,
}

impl<M: Mac> TruncatedHmac<M> {
    /// Wraps `inner`, keeping `hash_size_bits / 8` bytes of its output.
    ///
    /// # Errors
    ///
    /// Returns `KeelError::Config` if the size is zero, not a whole number
    /// of bytes, or larger than the underlying tag.
    pub fn new(inner: M, hash_size_bits: usize) -> KeelResult<Self> {
        let full_len = <M as hmac::digest::OutputSizeUser>::output_size();
        if hash_size_bits == 0 || hash_size_bits % 8 != 0 || hash_size_bits / 8 > full_len {
            return Err(KeelError::Config(format!(
                "invalid truncated HMAC size: {} bits",
                hash_size_bits
            )));
        }
        Ok(Self {
            inner,
            output_len: hash_size_bits / 8,
        })
    }

    /// Feeds data into the MAC.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Returns the truncated tag.
    pub fn finalize(self) -> Vec<u8> {
        let mut tag = self.inner.finalize().into_bytes().to_vec();
        tag.truncate(self.output_len);
        tag
    }

    /// Tag length in bytes.
    pub fn output_len(&self) -> usize {
        self.output_len
    }
}

/// Creates an HMAC-SHA1 truncated to `hash_size_bits`.
pub fn create_hmac_sha1_truncated(
    key: &[u8],
    hash_size_bits: usize,
) -> KeelResult<TruncatedHmac<HmacSha1>> {
    TruncatedHmac::new(create_hmac_sha1(key)?, hash_size_bits)
}

/// Creates an HMAC-SHA256 truncated to `hash_size_bits`.
pub fn create_hmac_sha256_truncated(
    key: &[u8],
    hash_size_bits: usize,
) -> KeelResult<TruncatedHmac<HmacSha256>> {
    TruncatedHmac::new(create_hmac_sha256(key)?, hash_size_bits)
}

/// Creates an HMAC-SHA512 truncated to `hash_size_bits`.
pub fn create_hmac_sha512_truncated(
    key: &[u8],
    hash_size_bits: usize,
) -> KeelResult<TruncatedHmac<HmacSha512>> {
    TruncatedHmac::new(create_hmac_sha512(key)?, hash_size_bits)
}
