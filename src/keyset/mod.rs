//! # Key File Readers
//!
//! Benchmark inputs are flat files of fixed-width unsigned keys, either
//! binary (host byte order, length implied by file size) or text (one
//! decimal integer per line, trailing whitespace tolerated).

use std::fs;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use crate::storage::Key;

/// Reads a host-byte-order binary key file.
pub fn read_binary(path: &Path) -> Result<Vec<Key>> {
    let bytes = fs::read(path)
        .wrap_err_with(|| format!("cannot read binary key file {}", path.display()))?;
    ensure!(
        bytes.len() % size_of::<Key>() == 0,
        "binary key file {} is {} bytes, not a multiple of {}",
        path.display(),
        bytes.len(),
        size_of::<Key>()
    );
    Ok(bytes
        .chunks_exact(size_of::<Key>())
        .map(|chunk| Key::from_ne_bytes(chunk.try_into().expect("exact chunk")))
        .collect())
}

/// Reads a text key file, one decimal key per line.
pub fn read_text(path: &Path) -> Result<Vec<Key>> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read text key file {}", path.display()))?;
    let mut keys = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key: Key = trimmed.parse().wrap_err_with(|| {
            format!("bad key on line {} of {}", lineno + 1, path.display())
        })?;
        keys.push(key);
    }
    Ok(keys)
}
