//! Model loader: fallback chain, cache hits, unload, version retention.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{dense, loader, loader_with, versioned, write_model, write_unhealthy, KEY};
use mscore::engine::ModelError;
use mscore::memory::CacheConfig;
use mscore::models::{LoadState, ModelEvent, SemVer};
use tempfile::TempDir;

#[tokio::test]
async fn test_fallback_to_last_known_good() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), "1.0.0", 0.1);
    write_unhealthy(dir.path(), "1.1.0");
    let primary = write_unhealthy(dir.path(), "1.2.0");
    let loader = loader(dir.path());

    let lease = loader.load(&primary, true).await.unwrap();
    assert_eq!(lease.metadata().identity.version, SemVer::new(1, 0, 0));
    assert!(lease.metadata().is_healthy);

    let cache = loader.cache();
    assert!(cache.contains(&versioned("1.0.0")));
    assert!(!cache.contains(&versioned("1.1.0")));
    assert!(!cache.contains(&versioned("1.2.0")));
    assert_eq!(loader.get_loaded(KEY).unwrap().metadata().identity.version, SemVer::new(1, 0, 0));
    assert_eq!(loader.state(KEY), LoadState::Healthy);
}

#[tokio::test]
async fn test_previous_good_preferred_over_oldest() {
    let dir = TempDir::new().unwrap();
    write_model(dir.path(), "1.0.0", 0.1);
    write_model(dir.path(), "1.1.0", 0.2);
    let primary = write_unhealthy(dir.path(), "1.2.0");

    let lease = loader(dir.path()).load(&primary, true).await.unwrap();
    assert_eq!(lease.metadata().identity.version, SemVer::new(1, 1, 0));
}

#[tokio::test]
async fn test_all_candidates_fail_is_no_model_available() {
    let dir = TempDir::new().unwrap();
    write_unhealthy(dir.path(), "1.0.0");
    let primary = write_unhealthy(dir.path(), "1.1.0");
    let loader = loader(dir.path());

    let err = loader.load(&primary, true).await.unwrap_err();
    match err {
        ModelError::NoModelAvailable { key, tried } => {
            assert_eq!(key, KEY);
            assert_eq!(tried.len(), 2);
            assert_eq!(tried[0], primary);
        }
        other => panic!("expected NoModelAvailable, got {other:?}"),
    }
    assert!(loader.cache().is_empty());
    assert_eq!(loader.state(KEY), LoadState::Failed);
}

#[tokio::test]
async fn test_unvalidated_load_skips_probe() {
    let dir = TempDir::new().unwrap();
    let path = write_unhealthy(dir.path(), "1.0.0");
    let lease = loader(dir.path()).load(&path, false).await.unwrap();
    assert!(!lease.metadata().is_healthy);
}

#[tokio::test]
async fn test_cache_hit_reuses_session() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());

    let first = loader.load(&path, true).await.unwrap();
    let second = loader.load(&path, true).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(first.session(), second.session()));
    assert_eq!(loader.cache().len(), 1);
}

#[tokio::test]
async fn test_changed_file_is_reloaded_on_load() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());
    let first = loader.load(&path, true).await.unwrap();
    let first_hash = first.metadata().content_hash.clone();
    drop(first);

    write_model(dir.path(), "1.0.0", 0.9);
    let second = loader.load(&path, true).await.unwrap();
    assert_ne!(second.metadata().content_hash, first_hash);
    assert_eq!(loader.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_truncated_during_hit_checks() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());
    drop(loader.load(&path, true).await.unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let (path, stop) = (path.clone(), stop.clone());
        let full = dense(0.1).to_bytes();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::fs::write(&path, b"").unwrap();
                std::fs::write(&path, &full).unwrap();
            }
        })
    };

    // Each call hashes the file while it is being truncated and rewritten.
    for _ in 0..200 {
        let _ = loader.load(&path, true).await;
    }
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();

    let lease = loader.load(&path, true).await.unwrap();
    assert!(lease.metadata().is_healthy);
}

#[tokio::test]
async fn test_unload_twice() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());
    drop(loader.load(&path, true).await.unwrap());

    assert!(loader.unload(KEY));
    assert!(!loader.unload(KEY));
    assert!(loader.get_loaded(KEY).is_none());
    assert!(loader.metadata(KEY).is_none());
    assert_eq!(loader.state(KEY), LoadState::Unloaded);
}

#[tokio::test]
async fn test_fourth_version_evicts_oldest() {
    let dir = TempDir::new().unwrap();
    let loader = loader_with(
        dir.path(),
        CacheConfig {
            max_versions: 3,
            ..Default::default()
        },
    );
    let versions = ["1.0.0", "1.0.1", "1.0.2", "1.0.3"];
    for v in versions {
        let path = write_model(dir.path(), v, 0.1);
        drop(loader.load_exact(&path, true).await.unwrap());
    }

    let cache = loader.cache();
    assert_eq!(cache.len(), 3);
    assert!(!cache.contains(&versioned("1.0.0")));
    for v in &versions[1..] {
        assert!(cache.contains(&versioned(v)), "{v} should stay resident");
    }
    assert_eq!(loader.metadata(KEY).unwrap().identity.version, SemVer::new(1, 0, 3));
}

#[tokio::test]
async fn test_load_emits_reloaded_event() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let loader = loader(dir.path());
    let mut events = loader.events().subscribe();

    drop(loader.load(&path, true).await.unwrap());
    match events.try_recv().unwrap() {
        ModelEvent::Reloaded(e) => {
            assert_eq!(e.key, KEY);
            assert_eq!(e.version, SemVer::new(1, 0, 0));
            assert!(e.is_healthy);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_resource_exhausted_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let path = write_model(dir.path(), "1.0.0", 0.1);
    let mut config = CacheConfig {
        emergency_cooldown: std::time::Duration::ZERO,
        ..Default::default()
    };
    config.limits.max_memory_bytes = 16;
    let loader = loader_with(dir.path(), config);

    let err = loader.load(&path, true).await.unwrap_err();
    assert!(matches!(err, ModelError::ResourceExhausted { ceiling: 16, .. }), "got {err:?}");
    assert!(loader.cache().is_empty());
}
