//! Digest helpers via `ring::digest`.
//!
//! All digests are rendered as upper-case hex, the canonical form used in
//! certificate file names, change keys and the metadata file.

use ring::digest::{Context, SHA1_FOR_LEGACY_USE_ONLY, SHA256, SHA512};
use std::io::Read;
use std::path::Path;

use crate::error::{Result, RootcaError};
use crate::types::BundleFingerprint;

/// Buffer size for streaming file reads (64 KiB).
const BUF_SIZE: usize = 64 * 1024;

/// SHA-256 of raw bytes, upper-case hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode_upper(ring::digest::digest(&SHA256, data))
}

/// SHA-1 of raw bytes, upper-case hex. Only for legacy vendor identifiers.
#[must_use]
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode_upper(ring::digest::digest(&SHA1_FOR_LEGACY_USE_ONLY, data))
}

/// Compute SHA-1, SHA-256 and SHA-512 of a file in one streaming pass.
///
/// # Errors
///
/// Returns `RootcaError::Io` if the file cannot be opened or read.
pub fn file_fingerprints(path: &Path) -> Result<BundleFingerprint> {
    let mut file = std::fs::File::open(path).map_err(|e| RootcaError::io(path, e))?;

    let mut sha1 = Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
    let mut sha256 = Context::new(&SHA256);
    let mut sha512 = Context::new(&SHA512);
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| RootcaError::io(path, e))?;
        if n == 0 {
            break;
        }
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
        sha512.update(&buf[..n]);
    }

    Ok(BundleFingerprint {
        sha1: hex::encode_upper(sha1.finish()),
        sha256: hex::encode_upper(sha256.finish()),
        sha512: hex::encode_upper(sha512.finish()),
    })
}
