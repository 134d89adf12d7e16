// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gzip compression of published artifacts.
//!
//! Compression runs only after an artifact is already visible, so a failure
//! here leaves a valid uncompressed artifact in place.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::atomic::{commit, temp_path};
use super::entry::compressed_path;

/// Gzip `source` into `{source}.gz` atomically. Returns the compressed size.
pub(crate) fn gzip_file(source: &Path) -> io::Result<u64> {
    let dest = compressed_path(source);
    let tmp = temp_path(&dest);
    let result = (|| {
        let mut input = BufReader::new(File::open(source)?);
        let mut encoder = GzEncoder::new(File::create(&tmp)?, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let file = encoder.finish()?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    })();
    match result {
        Ok(size) => {
            commit(&tmp, &dest)?;
            Ok(size)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Read a gzip file fully into memory.
pub(crate) fn gunzip_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
