// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration from an optional TOML file and `MSCORE_*`
//! environment variables.
//!
//! Environment variables override file values; both fall back to defaults.
//! Invalid values fall back without crashing and are floored/clamped to
//! safe ranges. Only an unreadable or malformed config file is an error.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MSCORE_CONFIG` | unset | Path to a TOML config file |
//! | `MSCORE_MODELS_DIR` | models | Directory scanned by hot-reload |
//! | `MSCORE_REGISTRY_DIR` | registry | Artifact store root |
//! | `MSCORE_MAX_MEMORY_BYTES` | 2147483648 | Resident model memory ceiling |
//! | `MSCORE_PRESSURE_VERY_HIGH` | 0.85 | Intelligent cleanup threshold |
//! | `MSCORE_PRESSURE_CRITICAL` | 0.90 | Emergency cleanup threshold |
//! | `MSCORE_PRESSURE_EMERGENCY` | 0.95 | Admission rejection threshold |
//! | `MSCORE_EMERGENCY_COOLDOWN_MS` | 500 | Wait before emergency cleanup |
//! | `MSCORE_UNUSED_IDLE_SECS` | 300 | Idle timeout for never-reused models |
//! | `MSCORE_CLEANUP_IDLE_SECS` | 600 | Idle floor for intelligent cleanup |
//! | `MSCORE_CLEANUP_USAGE_FLOOR` | 5 | Usage ceiling for intelligent cleanup |
//! | `MSCORE_ABSOLUTE_IDLE_SECS` | 3600 | Idle timeout for any model |
//! | `MSCORE_MAX_VERSIONS` | 3 | Resident versions per model |
//! | `MSCORE_LEAK_GRACE_SECS` | 120 | Grace before a retired session is a leak |
//! | `MSCORE_SWEEP_INTERVAL_SECS` | 60 | Idle sweep period |
//! | `MSCORE_RELOAD_INTERVAL_SECS` | 60 | Hot-reload poll period |
//! | `MSCORE_STORE_HEALTH_INTERVAL_SECS` | 3600 | Store health report period |
//! | `MSCORE_BATCH_INTERVAL_MS` | 100 | Batch cycle period |
//! | `MSCORE_BATCH_MAX_SIZE` | 32 | Requests per inference call |
//! | `MSCORE_BATCH_OVERFLOW` | 2 | Drain multiplier per cycle |
//! | `MSCORE_REQUEST_TIMEOUT_MS` | 30000 | Batched request timeout |
//! | `MSCORE_MAX_QUEUE_DEPTH` | 4096 | Max pending batched requests |
//! | `MSCORE_STORE_EXPIRY_DAYS` | 30 | Age at which entries are flagged |
//! | `MSCORE_KEEP_VERSIONS` | 5 | Versions kept per model by prune |
//! | `MSCORE_COMPRESS` | false | Gzip artifacts after publish |
//! | `MSCORE_SHUTDOWN_TIMEOUT_SECS` | 30 | Graceful shutdown timeout |
//! | `MSCORE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `MSCORE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `MSCORE_LOG_FILE` | unset | Log file instead of stderr |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{CacheConfig, MemoryLimitsConfig};
use crate::scheduler::{BatchConfig, RequestQueueConfig};
use crate::store::StoreConfig;
use crate::telemetry::{LogConfig, LogFormat};

pub const CONFIG_FILE_VAR: &str = "MSCORE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Values read from the TOML file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub models_dir: Option<PathBuf>,
    pub registry_dir: Option<PathBuf>,
    pub max_memory_bytes: Option<usize>,
    pub pressure_very_high: Option<f64>,
    pub pressure_critical: Option<f64>,
    pub pressure_emergency: Option<f64>,
    pub emergency_cooldown_ms: Option<u64>,
    pub unused_idle_secs: Option<u64>,
    pub cleanup_idle_secs: Option<u64>,
    pub cleanup_usage_floor: Option<u64>,
    pub absolute_idle_secs: Option<u64>,
    pub max_versions: Option<usize>,
    pub leak_grace_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub reload_interval_secs: Option<u64>,
    pub store_health_interval_secs: Option<u64>,
    pub batch_interval_ms: Option<u64>,
    pub batch_max_size: Option<usize>,
    pub batch_overflow: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub max_queue_depth: Option<usize>,
    pub store_expiry_days: Option<u64>,
    pub keep_versions: Option<usize>,
    pub compress: Option<bool>,
    pub shutdown_timeout_secs: Option<u64>,
    pub log_format: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.into(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.into(),
            source,
        })
    }
}

/// All runtime configuration.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub models_dir: PathBuf,
    pub store: StoreConfig,
    pub keep_versions: usize,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub request_queue: RequestQueueConfig,
    pub sweep_interval: Duration,
    pub reload_interval: Duration,
    pub store_health_interval: Duration,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        resolve(&FileConfig::default(), |_| None)
    }
}

/// Effective configuration summary, one entry per variable.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub entries: Vec<(&'static str, String)>,
}

/// Load the config file named by `MSCORE_CONFIG` (if any), then apply the environment.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let file = match std::env::var_os(CONFIG_FILE_VAR) {
        Some(path) if !path.is_empty() => FileConfig::from_path(Path::new(&path))?,
        _ => FileConfig::default(),
    };
    Ok(resolve(&file, |key| std::env::var(key).ok()))
}

/// Parse `key` from `env`, else take `fallback`; invalid values use `fallback`.
fn parse_or<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    fallback: T,
) -> T {
    match env(key) {
        Some(val) => val.trim().parse::<T>().unwrap_or(fallback),
        None => fallback,
    }
}

fn parse_bool(env: &impl Fn(&str) -> Option<String>, key: &str, fallback: bool) -> bool {
    match env(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => fallback,
    }
}

fn parse_path(env: &impl Fn(&str) -> Option<String>, key: &str, fallback: PathBuf) -> PathBuf {
    env(key)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(fallback)
}

fn load_cache_config(file: &FileConfig, env: &impl Fn(&str) -> Option<String>) -> CacheConfig {
    let d = CacheConfig::default();
    let max_memory = parse_or(
        env,
        "MSCORE_MAX_MEMORY_BYTES",
        file.max_memory_bytes.unwrap_or(d.limits.max_memory_bytes),
    );
    let limits = MemoryLimitsConfig {
        max_memory_bytes: max_memory.max(1024 * 1024), // floor: 1MB
        very_high: parse_or(
            env,
            "MSCORE_PRESSURE_VERY_HIGH",
            file.pressure_very_high.unwrap_or(d.limits.very_high),
        ),
        critical: parse_or(
            env,
            "MSCORE_PRESSURE_CRITICAL",
            file.pressure_critical.unwrap_or(d.limits.critical),
        ),
        emergency: parse_or(
            env,
            "MSCORE_PRESSURE_EMERGENCY",
            file.pressure_emergency.unwrap_or(d.limits.emergency),
        ),
    }
    .normalized();

    let secs = |key: &str, file_value: Option<u64>, default: Duration| {
        Duration::from_secs(parse_or(env, key, file_value.unwrap_or(default.as_secs())).max(1))
    };
    let cooldown_ms = parse_or(
        env,
        "MSCORE_EMERGENCY_COOLDOWN_MS",
        file.emergency_cooldown_ms
            .unwrap_or(d.emergency_cooldown.as_millis() as u64),
    );
    let usage_floor = parse_or(
        env,
        "MSCORE_CLEANUP_USAGE_FLOOR",
        file.cleanup_usage_floor.unwrap_or(d.cleanup_usage_floor),
    );
    let max_versions = parse_or(
        env,
        "MSCORE_MAX_VERSIONS",
        file.max_versions.unwrap_or(d.max_versions),
    );
    CacheConfig {
        limits,
        emergency_cooldown: Duration::from_millis(cooldown_ms),
        unused_idle_timeout: secs(
            "MSCORE_UNUSED_IDLE_SECS",
            file.unused_idle_secs,
            d.unused_idle_timeout,
        ),
        cleanup_idle_timeout: secs(
            "MSCORE_CLEANUP_IDLE_SECS",
            file.cleanup_idle_secs,
            d.cleanup_idle_timeout,
        ),
        cleanup_usage_floor: usage_floor,
        absolute_idle_timeout: secs(
            "MSCORE_ABSOLUTE_IDLE_SECS",
            file.absolute_idle_secs,
            d.absolute_idle_timeout,
        ),
        max_versions: max_versions.max(1),
        leak_grace: secs("MSCORE_LEAK_GRACE_SECS", file.leak_grace_secs, d.leak_grace),
    }
}

fn load_batch_config(file: &FileConfig, env: &impl Fn(&str) -> Option<String>) -> BatchConfig {
    let d = BatchConfig::default();
    let interval_ms = parse_or(
        env,
        "MSCORE_BATCH_INTERVAL_MS",
        file.batch_interval_ms
            .unwrap_or(d.interval.as_millis() as u64),
    );
    let timeout_ms = parse_or(
        env,
        "MSCORE_REQUEST_TIMEOUT_MS",
        file.request_timeout_ms
            .unwrap_or(d.request_timeout.as_millis() as u64),
    );
    let max_batch_size = parse_or(
        env,
        "MSCORE_BATCH_MAX_SIZE",
        file.batch_max_size.unwrap_or(d.max_batch_size),
    );
    let overflow_factor = parse_or(
        env,
        "MSCORE_BATCH_OVERFLOW",
        file.batch_overflow.unwrap_or(d.overflow_factor),
    );
    BatchConfig {
        interval: Duration::from_millis(interval_ms.clamp(1, 60_000)),
        max_batch_size: max_batch_size.clamp(1, 4096),
        overflow_factor: overflow_factor.clamp(1, 64),
        request_timeout: Duration::from_millis(timeout_ms.max(1)),
    }
}

fn load_log_config(file: &FileConfig, env: &impl Fn(&str) -> Option<String>) -> LogConfig {
    let d = LogConfig::default();
    let format = env("MSCORE_LOG_FORMAT")
        .or_else(|| file.log_format.clone())
        .and_then(|f| f.parse::<LogFormat>().ok())
        .unwrap_or(d.format);
    let level = env("MSCORE_LOG_LEVEL")
        .or_else(|| file.log_level.clone())
        .unwrap_or(d.level);
    let output_path = env("MSCORE_LOG_FILE")
        .map(PathBuf::from)
        .or_else(|| file.log_file.clone());
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Combine file values and an environment lookup into a config.
pub fn resolve(file: &FileConfig, env: impl Fn(&str) -> Option<String>) -> EnvConfig {
    let store_defaults = StoreConfig::default();
    let interval = |key: &str, file_value: Option<u64>, default: u64| {
        Duration::from_secs(parse_or(&env, key, file_value.unwrap_or(default)).max(1))
    };

    let expiry_days = parse_or(
        &env,
        "MSCORE_STORE_EXPIRY_DAYS",
        file.store_expiry_days.unwrap_or(30),
    );
    let store = StoreConfig {
        root: parse_path(
            &env,
            "MSCORE_REGISTRY_DIR",
            file.registry_dir.clone().unwrap_or(store_defaults.root),
        ),
        compress: parse_bool(
            &env,
            "MSCORE_COMPRESS",
            file.compress.unwrap_or(store_defaults.compress),
        ),
        expiry: Duration::from_secs(expiry_days.clamp(1, 36_500) * 24 * 60 * 60),
    };
    let models_dir = parse_path(
        &env,
        "MSCORE_MODELS_DIR",
        file.models_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("models")),
    );
    let keep_versions = parse_or(&env, "MSCORE_KEEP_VERSIONS", file.keep_versions.unwrap_or(5));
    let max_pending = parse_or(
        &env,
        "MSCORE_MAX_QUEUE_DEPTH",
        file.max_queue_depth.unwrap_or(4096),
    );

    EnvConfig {
        models_dir,
        store,
        keep_versions: keep_versions.max(1),
        cache: load_cache_config(file, &env),
        batch: load_batch_config(file, &env),
        request_queue: RequestQueueConfig {
            max_pending: max_pending.max(1),
        },
        sweep_interval: interval("MSCORE_SWEEP_INTERVAL_SECS", file.sweep_interval_secs, 60),
        reload_interval: interval("MSCORE_RELOAD_INTERVAL_SECS", file.reload_interval_secs, 60),
        store_health_interval: interval(
            "MSCORE_STORE_HEALTH_INTERVAL_SECS",
            file.store_health_interval_secs,
            3600,
        ),
        shutdown_timeout: interval(
            "MSCORE_SHUTDOWN_TIMEOUT_SECS",
            file.shutdown_timeout_secs,
            30,
        ),
        log: load_log_config(file, &env),
    }
}

impl EnvConfig {
    /// Summary of all effective values, keyed by environment variable.
    pub fn effective_config(&self) -> EffectiveConfig {
        let c = &self.cache;
        let entries = vec![
            ("MSCORE_MODELS_DIR", self.models_dir.display().to_string()),
            ("MSCORE_REGISTRY_DIR", self.store.root.display().to_string()),
            ("MSCORE_MAX_MEMORY_BYTES", c.limits.max_memory_bytes.to_string()),
            ("MSCORE_PRESSURE_VERY_HIGH", c.limits.very_high.to_string()),
            ("MSCORE_PRESSURE_CRITICAL", c.limits.critical.to_string()),
            ("MSCORE_PRESSURE_EMERGENCY", c.limits.emergency.to_string()),
            ("MSCORE_EMERGENCY_COOLDOWN_MS", c.emergency_cooldown.as_millis().to_string()),
            ("MSCORE_UNUSED_IDLE_SECS", c.unused_idle_timeout.as_secs().to_string()),
            ("MSCORE_CLEANUP_IDLE_SECS", c.cleanup_idle_timeout.as_secs().to_string()),
            ("MSCORE_CLEANUP_USAGE_FLOOR", c.cleanup_usage_floor.to_string()),
            ("MSCORE_ABSOLUTE_IDLE_SECS", c.absolute_idle_timeout.as_secs().to_string()),
            ("MSCORE_MAX_VERSIONS", c.max_versions.to_string()),
            ("MSCORE_LEAK_GRACE_SECS", c.leak_grace.as_secs().to_string()),
            ("MSCORE_SWEEP_INTERVAL_SECS", self.sweep_interval.as_secs().to_string()),
            ("MSCORE_RELOAD_INTERVAL_SECS", self.reload_interval.as_secs().to_string()),
            (
                "MSCORE_STORE_HEALTH_INTERVAL_SECS",
                self.store_health_interval.as_secs().to_string(),
            ),
            ("MSCORE_BATCH_INTERVAL_MS", self.batch.interval.as_millis().to_string()),
            ("MSCORE_BATCH_MAX_SIZE", self.batch.max_batch_size.to_string()),
            ("MSCORE_BATCH_OVERFLOW", self.batch.overflow_factor.to_string()),
            ("MSCORE_REQUEST_TIMEOUT_MS", self.batch.request_timeout.as_millis().to_string()),
            ("MSCORE_MAX_QUEUE_DEPTH", self.request_queue.max_pending.to_string()),
            ("MSCORE_STORE_EXPIRY_DAYS", (self.store.expiry.as_secs() / 86_400).to_string()),
            ("MSCORE_KEEP_VERSIONS", self.keep_versions.to_string()),
            ("MSCORE_COMPRESS", self.store.compress.to_string()),
            ("MSCORE_SHUTDOWN_TIMEOUT_SECS", self.shutdown_timeout.as_secs().to_string()),
            ("MSCORE_LOG_FORMAT", self.log.format.as_str().to_string()),
            ("MSCORE_LOG_LEVEL", self.log.level.clone()),
            (
                "MSCORE_LOG_FILE",
                self.log
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ];
        EffectiveConfig { entries }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_are_sensible() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.models_dir, PathBuf::from("models"));
        assert_eq!(cfg.store.root, PathBuf::from("registry"));
        assert_eq!(cfg.cache.limits.very_high, 0.85);
        assert_eq!(cfg.cache.limits.critical, 0.90);
        assert_eq!(cfg.cache.limits.emergency, 0.95);
        assert_eq!(cfg.cache.unused_idle_timeout, Duration::from_secs(300));
        assert_eq!(cfg.cache.cleanup_idle_timeout, Duration::from_secs(600));
        assert_eq!(cfg.cache.cleanup_usage_floor, 5);
        assert_eq!(cfg.cache.absolute_idle_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.cache.max_versions, 3);
        assert_eq!(cfg.batch.interval, Duration::from_millis(100));
        assert_eq!(cfg.batch.max_batch_size, 32);
        assert_eq!(cfg.batch.overflow_factor, 2);
        assert_eq!(cfg.batch.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.reload_interval, Duration::from_secs(60));
        assert_eq!(cfg.store.expiry, Duration::from_secs(30 * 86_400));
        assert_eq!(cfg.keep_versions, 5);
        assert!(!cfg.store.compress);
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig =
            toml::from_str("batch_max_size = 8\nmodels_dir = \"/srv/models\"\nmax_versions = 4")
                .unwrap();
        let cfg = resolve(
            &file,
            env_of(&[("MSCORE_BATCH_MAX_SIZE", "16"), ("MSCORE_COMPRESS", "yes")]),
        );
        assert_eq!(cfg.batch.max_batch_size, 16);
        assert_eq!(cfg.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(cfg.cache.max_versions, 4);
        assert!(cfg.store.compress);
    }

    #[test]
    fn test_invalid_values_fall_back_and_are_floored() {
        let cfg = resolve(
            &FileConfig::default(),
            env_of(&[
                ("MSCORE_BATCH_MAX_SIZE", "abc"),
                ("MSCORE_MAX_VERSIONS", "0"),
                ("MSCORE_MAX_MEMORY_BYTES", "10"),
                ("MSCORE_PRESSURE_CRITICAL", "0.5"),
                ("MSCORE_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(cfg.batch.max_batch_size, 32);
        assert_eq!(cfg.cache.max_versions, 1);
        assert_eq!(cfg.cache.limits.max_memory_bytes, 1024 * 1024);
        assert!(cfg.cache.limits.very_high <= cfg.cache.limits.critical);
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("no_such_key = 1").is_err());
    }

    #[test]
    fn test_load_reads_config_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mscore.toml");
        std::fs::write(&path, "keep_versions = 2\n").unwrap();
        std::env::set_var(CONFIG_FILE_VAR, &path);
        let cfg = load();
        std::env::remove_var(CONFIG_FILE_VAR);
        assert_eq!(cfg.unwrap().keep_versions, 2);
    }

    #[test]
    fn test_effective_config_lists_every_key() {
        let eff = EnvConfig::default().effective_config();
        assert_eq!(eff.entries.len(), 28);
        assert!(eff.entries.iter().all(|(k, _)| k.starts_with("MSCORE_")));
    }
}
