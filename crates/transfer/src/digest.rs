//! Whole-file integrity digests.
//!
//! MD5 rendered as 32 lowercase hex characters. Both ends compute it over
//! the fully materialized file once the transfer is complete.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::TransferError;

/// Length of a rendered digest in characters.
pub const DIGEST_HEX_LEN: usize = 32;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest of an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Digest of the full content of the file at `path`.
pub async fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Recomputes the digest of `path` and compares it with `remote`.
///
/// Returns the local digest on success.
pub async fn verify_file(path: &Path, remote: &str) -> Result<String, TransferError> {
    let local = file_digest(path).await?;
    if !local.eq_ignore_ascii_case(remote) {
        return Err(TransferError::IntegrityMismatch {
            file: path.to_path_buf(),
            local,
            remote: remote.to_string(),
        });
    }
    Ok(local)
}
