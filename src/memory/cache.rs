// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resident model cache and its reclamation policies.
//!
//! Uses DashMap for concurrent access. Sessions are keyed by their versioned
//! key so several versions of one identity can stay resident; a separate
//! serving map points each cache key at the version new requests use.
//!
//! Policy-driven eviction never removes a session with live leases: the
//! candidate is re-checked under the shard lock with `remove_if`.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::limits::{MemoryLimitsConfig, PressureLevel};
use super::snapshot::{process_resident_bytes, MemorySnapshot};
use crate::engine::ModelError;
use crate::models::{LoadedSession, ModelLease};
use crate::telemetry;

/// Configuration for the model cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub limits: MemoryLimitsConfig,
    /// Pause between intelligent and emergency cleanup.
    pub emergency_cooldown: Duration,
    /// Never-reused sessions idle longer than this are evicted by the sweep.
    pub unused_idle_timeout: Duration,
    /// Minimum idle time for intelligent cleanup candidates.
    pub cleanup_idle_timeout: Duration,
    /// Intelligent cleanup only considers sessions used fewer times than this.
    pub cleanup_usage_floor: u64,
    /// Any session idle longer than this is evicted by the sweep.
    pub absolute_idle_timeout: Duration,
    /// Resident versions kept per cache key.
    pub max_versions: usize,
    /// Removed sessions still referenced after this long are reported as leaks.
    pub leak_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            limits: MemoryLimitsConfig::default(),
            emergency_cooldown: Duration::from_millis(500),
            unused_idle_timeout: Duration::from_secs(5 * 60),
            cleanup_idle_timeout: Duration::from_secs(10 * 60),
            cleanup_usage_floor: 5,
            absolute_idle_timeout: Duration::from_secs(60 * 60),
            max_versions: 3,
            leak_grace: Duration::from_secs(120),
        }
    }
}

/// Why a session left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Idle sweep.
    Idle,
    /// Pressure-driven cleanup of rarely used sessions.
    Intelligent,
    /// Last-resort cleanup under critical pressure.
    Emergency,
    /// Version retention for a cache key.
    Retention,
    /// Same version re-admitted.
    Replaced,
    /// Explicit unload or clear.
    Unload,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Intelligent => "intelligent",
            Self::Emergency => "emergency",
            Self::Retention => "retention",
            Self::Replaced => "replaced",
            Self::Unload => "unload",
        }
    }
}

struct Retired {
    key: String,
    session: Weak<LoadedSession>,
    retired_at: Instant,
}

/// Cache of health-validated sessions.
pub struct ModelCache {
    config: CacheConfig,
    entries: DashMap<String, Arc<LoadedSession>>,
    serving: DashMap<String, String>,
    retired: Mutex<Vec<Retired>>,
}

impl ModelCache {
    pub fn new(mut config: CacheConfig) -> Self {
        config.limits = config.limits.normalized();
        config.max_versions = config.max_versions.max(1);
        Self {
            config,
            entries: DashMap::new(),
            serving: DashMap::new(),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Lease a resident version, recording a use.
    pub fn get(&self, versioned_key: &str) -> Option<ModelLease> {
        // The lease is taken under the shard read lock, so `remove_if` sees it.
        self.entries
            .get(versioned_key)
            .map(|e| ModelLease::acquire(e.value().clone()))
    }

    /// Resident version without recording a use.
    pub fn peek(&self, versioned_key: &str) -> Option<Arc<LoadedSession>> {
        self.entries.get(versioned_key).map(|e| e.value().clone())
    }

    /// Lease the serving version for a cache key.
    pub fn serving(&self, cache_key: &str) -> Option<ModelLease> {
        let versioned = self.serving.get(cache_key)?.value().clone();
        self.get(&versioned)
    }

    /// Serving version for a cache key without recording a use.
    pub fn peek_serving(&self, cache_key: &str) -> Option<Arc<LoadedSession>> {
        let versioned = self.serving.get(cache_key)?.value().clone();
        self.peek(&versioned)
    }

    /// Cache keys that currently have a serving version.
    pub fn serving_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .serving
            .iter()
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Point `cache_key` at a resident version that passed its health probe.
    ///
    /// Returns false, leaving the current serving version in place, if the
    /// version is not resident or not healthy.
    pub fn swap_if_healthy(&self, cache_key: &str, versioned_key: &str) -> bool {
        let Some(session) = self.peek(versioned_key) else {
            return false;
        };
        if !session.metadata().is_healthy {
            return false;
        }
        let previous = self
            .serving
            .insert(cache_key.to_string(), versioned_key.to_string());
        tracing::debug!(
            key = cache_key,
            from = ?previous,
            to = versioned_key,
            "serving version swapped"
        );
        true
    }

    /// Sum of resident session footprints.
    pub fn resident_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.value().memory_bytes()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, versioned_key: &str) -> bool {
        self.entries.contains_key(versioned_key)
    }

    pub fn pressure_level(&self) -> PressureLevel {
        self.config.limits.level(self.resident_bytes())
    }

    /// Make room for `incoming` bytes.
    ///
    /// Above the very-high tier runs intelligent cleanup; if still above the
    /// critical tier, waits the cooldown and runs emergency cleanup; if still
    /// above the emergency tier, rejects the admission.
    pub async fn ensure_capacity(&self, incoming: usize) -> Result<(), ModelError> {
        let limits = &self.config.limits;
        let projected = |cache: &Self| cache.resident_bytes().saturating_add(incoming);

        if limits.level(projected(self)) < PressureLevel::VeryHigh {
            return Ok(());
        }
        tracing::info!(
            resident = self.resident_bytes(),
            incoming,
            ceiling = limits.max_memory_bytes,
            "memory pressure very high, running intelligent cleanup"
        );
        self.intelligent_cleanup();

        if limits.level(projected(self)) >= PressureLevel::Critical {
            tokio::time::sleep(self.config.emergency_cooldown).await;
            tracing::warn!(
                resident = self.resident_bytes(),
                incoming,
                ceiling = limits.max_memory_bytes,
                "memory pressure critical, running emergency cleanup"
            );
            self.emergency_cleanup();
        }

        let resident = self.resident_bytes();
        if limits.level(resident.saturating_add(incoming)) >= PressureLevel::Emergency {
            tracing::error!(
                resident,
                incoming,
                ceiling = limits.max_memory_bytes,
                "admission rejected"
            );
            return Err(ModelError::ResourceExhausted {
                resident,
                ceiling: limits.max_memory_bytes,
            });
        }
        Ok(())
    }

    /// Insert a validated session and enforce version retention for its key.
    ///
    /// With `serve` set the session also becomes the serving version.
    pub fn insert(&self, session: Arc<LoadedSession>, serve: bool) -> ModelLease {
        let metadata = session.metadata();
        let versioned = metadata.versioned_key();
        let cache_key = metadata.cache_key();

        let lease = ModelLease::pin(session.clone());
        if let Some(old) = self.entries.insert(versioned.clone(), session) {
            self.retire(&versioned, old, EvictionPolicy::Replaced);
        }
        if serve {
            self.serving.insert(cache_key.clone(), versioned);
        }
        self.enforce_retention(&cache_key);
        self.record_gauges();
        lease
    }

    /// Keep at most `max_versions` resident versions of `cache_key`, evicting
    /// the oldest by version. The serving version is never chosen.
    pub fn enforce_retention(&self, cache_key: &str) -> Vec<String> {
        let serving = self.serving.get(cache_key).map(|e| e.value().clone());
        let mut versions: Vec<(String, Arc<LoadedSession>)> = self
            .entries
            .iter()
            .filter(|e| e.value().metadata().cache_key() == cache_key)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        if versions.len() <= self.config.max_versions {
            return Vec::new();
        }
        versions.sort_by(|a, b| {
            a.1.metadata()
                .identity
                .version_cmp(&b.1.metadata().identity)
        });

        let excess = versions.len() - self.config.max_versions;
        let oldest = versions
            .into_iter()
            .filter(|(k, _)| Some(k) != serving.as_ref())
            .take(excess);
        let mut evicted = Vec::new();
        for (key, _) in oldest {
            // In-flight leases keep their Arc; removal only stops new ones.
            if let Some((key, session)) = self.entries.remove(&key) {
                self.retire(&key, session, EvictionPolicy::Retention);
                evicted.push(key);
            }
        }
        evicted
    }

    /// Evict never-reused sessions idle past the unused timeout and any
    /// session idle past the absolute timeout.
    pub fn idle_sweep(&self) -> Vec<String> {
        let unused = self.config.unused_idle_timeout;
        let absolute = self.config.absolute_idle_timeout;
        let is_idle = move |s: &LoadedSession| {
            let idle = s.idle_for();
            (s.usage_count() == 0 && idle > unused) || idle > absolute
        };

        let candidates: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|e| is_idle(e.value()))
            .map(|e| (e.key().clone(), e.value().usage_count()))
            .collect();

        let evicted: Vec<String> = candidates
            .into_iter()
            .filter_map(|(key, usage)| {
                self.evict_unused(&key, usage, EvictionPolicy::Idle, |s| is_idle(s))
            })
            .collect();
        if !evicted.is_empty() {
            tracing::info!(
                count = evicted.len(),
                keys = ?evicted,
                "idle sweep evicted models"
            );
            self.record_gauges();
        }
        evicted
    }

    /// Evict up to a third of the resident sessions (rounded up) among those
    /// idle past the cleanup timeout and used fewer than the usage floor,
    /// least used first, then least recently used.
    pub fn intelligent_cleanup(&self) -> Vec<String> {
        let idle = self.config.cleanup_idle_timeout;
        let floor = self.config.cleanup_usage_floor;
        let limit = self.entries.len().div_ceil(3);

        let mut candidates: Vec<(String, u64, Instant)> = self
            .entries
            .iter()
            .filter(|e| e.value().idle_for() > idle && e.value().usage_count() < floor)
            .map(|e| {
                let s = e.value();
                (e.key().clone(), s.usage_count(), s.last_used())
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let evicted: Vec<String> = candidates
            .into_iter()
            .filter_map(|(key, usage, _)| {
                self.evict_unused(&key, usage, EvictionPolicy::Intelligent, |s| {
                    s.idle_for() > idle && s.usage_count() < floor
                })
            })
            .take(limit)
            .collect();
        if !evicted.is_empty() {
            tracing::info!(
                count = evicted.len(),
                keys = ?evicted,
                "intelligent cleanup evicted models"
            );
            self.record_gauges();
        }
        evicted
    }

    /// Evict up to half of the resident sessions (rounded up), least recently
    /// used first and larger footprints first among ties.
    pub fn emergency_cleanup(&self) -> Vec<String> {
        let limit = self.entries.len().div_ceil(2);

        let mut candidates: Vec<(String, u64, Instant, usize)> = self
            .entries
            .iter()
            .map(|e| {
                let s = e.value();
                (e.key().clone(), s.usage_count(), s.last_used(), s.memory_bytes())
            })
            .collect();
        candidates.sort_by(|a, b| a.2.cmp(&b.2).then(b.3.cmp(&a.3)));

        let evicted: Vec<String> = candidates
            .into_iter()
            .filter_map(|(key, usage, _, _)| {
                self.evict_unused(&key, usage, EvictionPolicy::Emergency, |_| true)
            })
            .take(limit)
            .collect();
        if !evicted.is_empty() {
            tracing::warn!(
                count = evicted.len(),
                keys = ?evicted,
                "emergency cleanup evicted models"
            );
            self.record_gauges();
        }
        evicted
    }

    /// Evict one session if it has no live leases and was not used since
    /// `usage_seen` was read.
    pub fn evict_if_idle(&self, versioned_key: &str, usage_seen: u64) -> bool {
        let evicted = self
            .evict_unused(versioned_key, usage_seen, EvictionPolicy::Idle, |_| true)
            .is_some();
        if evicted {
            self.record_gauges();
        }
        evicted
    }

    fn evict_unused(
        &self,
        key: &str,
        usage_seen: u64,
        policy: EvictionPolicy,
        still_eligible: impl Fn(&LoadedSession) -> bool,
    ) -> Option<String> {
        let (key, session) = self.entries.remove_if(key, |_, s| {
            s.in_flight() == 0 && s.usage_count() == usage_seen && still_eligible(s)
        })?;
        self.retire(&key, session, policy);
        Some(key)
    }

    /// Remove a version, or every version of a cache key. Idempotent.
    ///
    /// Returns true if anything was resident.
    pub fn unload(&self, key: &str) -> bool {
        if let Some((key, session)) = self.entries.remove(key) {
            self.retire(&key, session, EvictionPolicy::Unload);
            self.record_gauges();
            return true;
        }

        let serving = self.serving.remove(key).is_some();
        let versions: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().metadata().cache_key() == key)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = false;
        for versioned in versions {
            if let Some((versioned, session)) = self.entries.remove(&versioned) {
                self.retire(&versioned, session, EvictionPolicy::Unload);
                removed = true;
            }
        }
        self.record_gauges();
        serving || removed
    }

    /// Drop every resident session.
    pub fn clear(&self) {
        self.serving.clear();
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((key, session)) = self.entries.remove(&key) {
                self.retire(&key, session, EvictionPolicy::Unload);
            }
        }
        self.record_gauges();
    }

    fn retire(&self, key: &str, session: Arc<LoadedSession>, policy: EvictionPolicy) {
        if policy != EvictionPolicy::Replaced {
            let cache_key = session.metadata().cache_key();
            // A concurrent load may already have re-admitted the same version.
            self.serving
                .remove_if(&cache_key, |_, v| v == key && !self.entries.contains_key(key));
        }
        tracing::debug!(
            key,
            policy = policy.as_str(),
            memory_bytes = session.memory_bytes(),
            in_flight = session.in_flight(),
            "model evicted"
        );
        telemetry::record_eviction(policy.as_str());
        self.retired.lock().push(Retired {
            key: key.to_string(),
            session: Arc::downgrade(&session),
            retired_at: Instant::now(),
        });
    }

    /// Removed sessions still alive past the grace period.
    pub fn detected_leaks(&self) -> Vec<String> {
        let grace = self.config.leak_grace;
        let mut retired = self.retired.lock();
        retired.retain(|r| r.session.strong_count() > 0);
        retired
            .iter()
            .filter(|r| r.retired_at.elapsed() > grace)
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        let per_model_memory = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().memory_bytes()))
            .collect();
        MemorySnapshot {
            total_memory: process_resident_bytes(),
            ml_memory: self.resident_bytes(),
            per_model_memory,
            loaded_count: self.entries.len(),
            detected_leaks: self.detected_leaks(),
        }
    }

    fn record_gauges(&self) {
        telemetry::record_residency(self.resident_bytes(), self.entries.len());
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::tests::dense_session;

    fn cache(config: CacheConfig) -> ModelCache {
        ModelCache::new(config)
    }

    fn arc(name: &str) -> Arc<LoadedSession> {
        Arc::new(dense_session(name))
    }

    #[test]
    fn test_insert_and_serving() {
        let c = cache(CacheConfig::default());
        drop(c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true));
        assert!(c.serving("f.ES.s.r").is_some());
        assert!(c.contains("f.ES.s.r.v1.0.0+00000001"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_retention_evicts_single_oldest() {
        let c = cache(CacheConfig::default());
        for (i, v) in ["1.0.0", "1.0.1", "1.0.2", "1.0.3"].iter().enumerate() {
            let name = format!("f.ES.s.r.v{}+0000000{}.bin", v, i);
            drop(c.insert(arc(&name), true));
        }
        assert_eq!(c.len(), 3);
        assert!(!c.contains("f.ES.s.r.v1.0.0+00000000"));
        assert!(c.contains("f.ES.s.r.v1.0.3+00000003"));
    }

    #[test]
    fn test_unload_is_idempotent() {
        let c = cache(CacheConfig::default());
        drop(c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true));
        assert!(c.unload("f.ES.s.r"));
        assert!(!c.unload("f.ES.s.r"));
        assert!(c.serving("f.ES.s.r").is_none());
    }

    #[test]
    fn test_eviction_skips_leased_sessions() {
        let config = CacheConfig {
            unused_idle_timeout: Duration::ZERO,
            ..Default::default()
        };
        let c = cache(config);
        let lease = c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true);
        std::thread::sleep(Duration::from_millis(5));
        assert!(c.emergency_cleanup().is_empty());
        drop(lease);
        assert_eq!(c.emergency_cleanup().len(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_idle_sweep_evicts_unused() {
        let config = CacheConfig {
            unused_idle_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let c = cache(config);
        drop(c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(c.idle_sweep(), vec!["f.ES.s.r.v1.0.0+00000001".to_string()]);
    }

    #[test]
    fn test_leak_detected_after_grace() {
        let config = CacheConfig {
            leak_grace: Duration::from_millis(1),
            ..Default::default()
        };
        let c = cache(config);
        let lease = c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true);
        assert!(c.unload("f.ES.s.r"));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            c.snapshot().detected_leaks,
            vec!["f.ES.s.r.v1.0.0+00000001".to_string()]
        );
        drop(lease);
        assert!(c.snapshot().detected_leaks.is_empty());
    }

    #[test]
    fn test_swap_keeps_old_version_resident() {
        let c = cache(CacheConfig::default());
        drop(c.insert(arc("f.ES.s.r.v1.0.0+00000001.bin"), true));
        drop(c.insert(arc("f.ES.s.r.v1.1.0+00000002.bin"), false));
        let serving = c.peek_serving("f.ES.s.r").unwrap();
        assert_eq!(serving.metadata().versioned_key(), "f.ES.s.r.v1.0.0+00000001");

        assert!(c.swap_if_healthy("f.ES.s.r", "f.ES.s.r.v1.1.0+00000002"));
        let serving = c.peek_serving("f.ES.s.r").unwrap();
        assert_eq!(serving.metadata().versioned_key(), "f.ES.s.r.v1.1.0+00000002");
        assert_eq!(c.len(), 2);
        assert!(!c.swap_if_healthy("f.ES.s.r", "f.ES.s.r.v9.0.0+00000009"));
    }

    #[tokio::test]
    async fn test_admission_rejected_when_nothing_evictable() {
        let config = CacheConfig {
            limits: MemoryLimitsConfig {
                max_memory_bytes: 100,
                ..Default::default()
            },
            emergency_cooldown: Duration::from_millis(1),
            ..Default::default()
        };
        let c = cache(config);
        let err = c.ensure_capacity(200).await.unwrap_err();
        assert!(matches!(err, ModelError::ResourceExhausted { ceiling: 100, .. }));
        assert!(c.ensure_capacity(10).await.is_ok());
    }
}
