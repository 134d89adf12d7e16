// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! SHA-256 content hashing for artifacts.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use memmap2::Mmap;
use sha2::{Digest, Sha256};

/// Uppercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(bytes))
}

/// Uppercase hex SHA-256 of a file, streamed through a buffered reader.
///
/// Safe for files other processes may rewrite while they are being hashed.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode_upper(hasher.finalize()))
}

/// Uppercase hex SHA-256 of a staged file only this process writes.
pub(crate) fn sha256_mapped(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(sha256_hex(&[]));
    }
    // SAFETY: read-only mapping of a uuid-named staging file private to this store.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(sha256_hex(&mmap))
}

/// Case-insensitive hash comparison.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
