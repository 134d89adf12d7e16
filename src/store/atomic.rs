// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Write-to-temp-then-rename helpers.
//!
//! A destination path only ever names a complete file: bytes go to a
//! sibling temp file, are flushed to disk, and the temp file is renamed
//! over the destination. An existing destination is first moved aside to
//! a backup so a failed rename can be rolled back.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Temp file next to `dest` (same directory, so rename stays on one filesystem).
pub(crate) fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    dest.with_file_name(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple()))
}

fn backup_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    dest.with_file_name(format!(".{}.bak-{}", name, uuid::Uuid::new_v4().simple()))
}

/// Move a finished temp file onto `dest`, replacing any existing file with backup.
pub(crate) fn commit(tmp: &Path, dest: &Path) -> io::Result<()> {
    if !dest.exists() {
        return fs::rename(tmp, dest);
    }

    let backup = backup_path(dest);
    fs::rename(dest, &backup)?;
    if let Err(e) = fs::rename(tmp, dest) {
        // Put the previous file back; the temp file is abandoned.
        let _ = fs::rename(&backup, dest);
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(&backup) {
        tracing::warn!(path = %backup.display(), error = %e, "failed to remove publish backup");
    }
    Ok(())
}

/// Atomically write `bytes` to `dest`.
pub(crate) fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(dest);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    commit(&tmp, dest)
}

/// Atomically copy `source` to `dest`, streaming through a temp file.
pub(crate) fn copy_atomic(source: &Path, dest: &Path) -> io::Result<u64> {
    let tmp = temp_path(dest);
    let result = (|| {
        let mut input = File::open(source)?;
        let mut output = File::create(&tmp)?;
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n])?;
            total += n as u64;
        }
        output.sync_all()?;
        Ok(total)
    })();
    match result {
        Ok(total) => {
            commit(&tmp, dest)?;
            Ok(total)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}
