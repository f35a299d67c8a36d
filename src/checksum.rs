//! Content fingerprints and the skip-if-unchanged gate.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use crate::store::TriageStore;

const BUF_SIZE: usize = 64 * 1024;

/// Streamed SHA-256 of a file's bytes, as lowercase hex.
///
/// A missing file surfaces as an [`std::io::Error`] of kind `NotFound`
/// inside the returned error chain.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Cannot open file: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read file: {}", path.display()))
            }
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// True when the latest record for this exact path carries the file's
/// current fingerprint. An edited file is therefore processed again.
pub async fn already_processed(store: &TriageStore, path: &Path) -> Result<bool> {
    let key = source_key(path);
    let Some(record) = store.latest_by_source_path(&key).await? else {
        return Ok(false);
    };
    let current = fingerprint(path)?;
    Ok(record.checksum == current)
}

/// Same check as [`already_processed`] with a fingerprint computed earlier.
pub async fn matches_latest(store: &TriageStore, path: &Path, checksum: &str) -> Result<bool> {
    let key = source_key(path);
    Ok(store
        .latest_by_source_path(&key)
        .await?
        .is_some_and(|record| record.checksum == checksum))
}

/// The string under which a file's records are stored: its absolute path.
pub fn source_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}
