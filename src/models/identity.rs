// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Versioned model filenames:
//! `{family}.{symbol}.{strategy}.{regime}.v{major}.{minor}.{patch}+{hash8}.{ext}`.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::ModelError;

const FILE_PATTERN: &str = concat!(
    r"^(?P<family>[^.+/\\]+)\.(?P<symbol>[^.+/\\]+)\.",
    r"(?P<strategy>[^.+/\\]+)\.(?P<regime>[^.+/\\]+)\.",
    r"v(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)",
    r"\+(?P<hash>[0-9A-Fa-f]{8})\.(?P<ext>[A-Za-z0-9]+)$",
);

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Constant pattern, exercised by every parse test.
    PATTERN.get_or_init(|| Regex::new(FILE_PATTERN).expect("FILE_PATTERN is a valid regex"))
}

/// Semantic version `major.minor.patch`, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity parsed from a versioned model filename. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub family: String,
    pub symbol: String,
    pub strategy: String,
    pub regime: String,
    pub version: SemVer,
    /// Eight hex characters, case preserved.
    pub hash_prefix: String,
    pub extension: String,
}

impl ModelIdentity {
    /// Parse a bare filename.
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = pattern().captures(file_name)?;
        let num = |k: &str| caps[k].parse::<u64>().ok();
        Some(Self {
            family: caps["family"].to_string(),
            symbol: caps["symbol"].to_string(),
            strategy: caps["strategy"].to_string(),
            regime: caps["regime"].to_string(),
            version: SemVer::new(num("major")?, num("minor")?, num("patch")?),
            hash_prefix: caps["hash"].to_string(),
            extension: caps["ext"].to_string(),
        })
    }

    /// Parse the filename component of a path.
    pub fn from_path(path: &Path) -> Result<Self, ModelError> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::parse)
            .ok_or_else(|| {
                ModelError::corrupt(path, "filename does not match the versioned model pattern")
            })
    }

    /// Cache key shared by every version: `family.symbol.strategy.regime`.
    pub fn cache_key(&self) -> String {
        format!("{}.{}.{}.{}", self.family, self.symbol, self.strategy, self.regime)
    }

    /// Key of one concrete version: `family.symbol.strategy.regime.vX.Y.Z+hash`.
    pub fn versioned_key(&self) -> String {
        format!("{}.v{}+{}", self.cache_key(), self.version, self.hash_prefix)
    }

    /// Reconstruct the filename.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.versioned_key(), self.extension)
    }

    /// Ordering between versions of one identity: semantic version, then hash prefix.
    pub fn version_cmp(&self, other: &Self) -> Ordering {
        let ours = self.hash_prefix.to_ascii_lowercase();
        let theirs = other.hash_prefix.to_ascii_lowercase();
        self.version
            .cmp(&other.version)
            .then_with(|| ours.cmp(&theirs))
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
