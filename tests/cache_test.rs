//! Cache manager: eviction safety under concurrent load, idle sweep,
//! memory accounting and leak detection.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{dense, loader, loader_with, write_model, KEY};
use mscore::memory::{CacheConfig, PressureLevel};
use tempfile::TempDir;

fn write_symbol(dir: &Path, symbol: usize) -> PathBuf {
    let path = dir.join(format!("strategy.S{symbol}.momentum.trend.v1.0.0+{symbol:08x}.bin"));
    std::fs::write(&path, dense(0.1).to_bytes()).unwrap();
    path
}

/// Every session is eligible for every reclamation policy at once.
fn aggressive() -> CacheConfig {
    CacheConfig {
        unused_idle_timeout: Duration::ZERO,
        cleanup_idle_timeout: Duration::ZERO,
        absolute_idle_timeout: Duration::ZERO,
        cleanup_usage_floor: u64::MAX,
        emergency_cooldown: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leased_sessions_survive_concurrent_reclamation() {
    let dir = TempDir::new().unwrap();
    let paths: Arc<Vec<PathBuf>> = Arc::new((0..4).map(|i| write_symbol(dir.path(), i)).collect());
    let loader = loader_with(dir.path(), aggressive());
    let stop = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let cache = loader.cache().clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut passes = 0u64;
            while !stop.load(Ordering::Relaxed) {
                cache.idle_sweep();
                cache.intelligent_cleanup();
                cache.emergency_cleanup();
                passes += 1;
                tokio::task::yield_now().await;
            }
            passes
        })
    };

    let mut workers = Vec::new();
    for w in 0..8usize {
        let loader = loader.clone();
        let paths = paths.clone();
        workers.push(tokio::spawn(async move {
            for i in 0..100usize {
                let path = &paths[(w + i) % paths.len()];
                let lease = loader.acquire(path).await.unwrap();
                let key = lease.metadata().versioned_key();
                tokio::task::yield_now().await;
                let resident = loader.cache().peek(&key).expect("leased session was evicted");
                assert!(Arc::ptr_eq(&resident, lease.session()));
                drop(lease);
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(sweeper.await.unwrap() > 0);

    // Nothing holds a lease now; evicted sessions are all dropped.
    loader.cache().idle_sweep();
    assert!(loader.cache().snapshot().detected_leaks.is_empty());
}

#[tokio::test]
async fn test_evict_if_idle_rechecks_usage() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());
    let lease = loader.load(&path, true).await.unwrap();
    let key = lease.metadata().versioned_key();
    let seen = lease.usage_count();

    // Still leased.
    assert!(!loader.cache().evict_if_idle(&key, seen));
    drop(lease);

    // Used again after the candidate was picked.
    drop(loader.get_loaded(KEY).unwrap());
    assert!(!loader.cache().evict_if_idle(&key, seen));

    let current = loader.cache().peek(&key).unwrap().usage_count();
    assert!(loader.cache().evict_if_idle(&key, current));
    assert!(loader.get_loaded(KEY).is_none());
}

#[tokio::test]
async fn test_idle_sweep_respects_timeouts() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);

    let patient = loader(dir.path());
    drop(patient.load(&path, true).await.unwrap());
    assert!(patient.cache().idle_sweep().is_empty());

    let eager = loader_with(
        dir.path(),
        CacheConfig {
            absolute_idle_timeout: Duration::ZERO,
            ..Default::default()
        },
    );
    drop(eager.load(&path, true).await.unwrap());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(eager.cache().idle_sweep().len(), 1);
    assert!(eager.cache().is_empty());
}

#[tokio::test]
async fn test_idle_sweep_evicts_loaded_but_never_reused() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader_with(
        dir.path(),
        CacheConfig {
            unused_idle_timeout: Duration::from_millis(1),
            ..Default::default()
        },
    );

    let lease = loader.load(&path, true).await.unwrap();
    assert_eq!(lease.usage_count(), 0);
    let key = lease.metadata().versioned_key();
    drop(lease);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(loader.cache().idle_sweep(), vec![key]);
    assert!(loader.get_loaded(KEY).is_none());
}

#[tokio::test]
async fn test_usage_floor_counts_only_reuses() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader_with(
        dir.path(),
        CacheConfig {
            cleanup_idle_timeout: Duration::ZERO,
            cleanup_usage_floor: 5,
            ..Default::default()
        },
    );

    drop(loader.load(&path, true).await.unwrap());
    for _ in 0..4 {
        drop(loader.get_loaded(KEY).unwrap());
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(loader.cache().intelligent_cleanup().len(), 1);
    assert!(loader.cache().is_empty());
}

#[tokio::test]
async fn test_snapshot_accounts_every_session() {
    let dir = TempDir::new().unwrap();
    let loader = loader(dir.path());
    for i in 0..3 {
        drop(loader.load(&write_symbol(dir.path(), i), true).await.unwrap());
    }

    let snapshot = loader.cache().snapshot();
    assert_eq!(snapshot.loaded_count, 3);
    assert_eq!(snapshot.per_model_memory.len(), 3);
    assert_eq!(snapshot.ml_memory, snapshot.per_model_memory.values().sum::<usize>());
    assert!(snapshot.ml_memory > 0);
    assert_eq!(loader.cache().pressure_level(), PressureLevel::Normal);
}

#[tokio::test]
async fn test_unloaded_session_held_past_grace_is_a_leak() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader_with(
        dir.path(),
        CacheConfig {
            leak_grace: Duration::ZERO,
            ..Default::default()
        },
    );
    let lease = loader.load(&path, true).await.unwrap();

    assert!(loader.unload(KEY));
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(loader.cache().detected_leaks(), vec![lease.metadata().versioned_key()]);

    drop(lease);
    assert!(loader.cache().detected_leaks().is_empty());
}

#[tokio::test]
async fn test_pressure_evicts_cold_sessions_before_rejecting() {
    let dir = TempDir::new().unwrap();
    let first = write_symbol(dir.path(), 1);
    let second = write_symbol(dir.path(), 2);

    // Room for about one session: the second admission must reclaim the first.
    let sizing = loader(dir.path());
    let footprint = sizing.load(&first, true).await.unwrap().memory_bytes();
    let mut config = aggressive();
    config.limits.max_memory_bytes = footprint + footprint / 2;
    let loader = loader_with(dir.path(), config);

    drop(loader.load(&first, true).await.unwrap());
    let lease = loader.load(&second, true).await.unwrap();
    assert_eq!(loader.cache().len(), 1);
    assert!(loader.cache().contains(&lease.metadata().versioned_key()));
}
