//! Runtime facade: public operations, health and graceful shutdown.

mod common;

use std::time::Duration;

use common::{write_model, KEY};
use mscore::engine::{BackendSet, ModelError};
use mscore::health::HealthState;
use mscore::models::{ModelEvent, SemVer};
use mscore::shutdown::ShutdownResult;
use mscore::{Runtime, RuntimeConfig};
use tempfile::TempDir;

fn runtime(dir: &TempDir) -> Runtime {
    let mut config = RuntimeConfig::default();
    config.models_dir = dir.path().join("models");
    config.store.root = dir.path().join("registry");
    config.batch.interval = Duration::from_millis(10);
    std::fs::create_dir_all(&config.models_dir).unwrap();
    Runtime::new(config, BackendSet::default()).unwrap()
}

#[tokio::test]
async fn test_load_query_unload() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);
    let models = rt.config().models_dir.clone();
    let v1 = write_model(&models, "1.0.0", 0.1);
    write_model(&models, "1.0.1", 0.2);
    let mut events = rt.subscribe();

    let lease = rt.load_model(&v1, None).await.unwrap();
    assert_eq!(lease.metadata().identity.version, SemVer::new(1, 0, 0));
    drop(lease);
    assert!(matches!(events.try_recv().unwrap(), ModelEvent::Reloaded(_)));

    let lease = rt.load_model(&v1, Some("v1.0.1")).await.unwrap();
    assert_eq!(lease.metadata().identity.version, SemVer::new(1, 0, 1));
    drop(lease);
    assert_eq!(rt.get_model_metadata(KEY).unwrap().identity.version, SemVer::new(1, 0, 1));
    assert!(rt.get_loaded_model(KEY).is_some());

    let snapshot = rt.memory_snapshot();
    assert_eq!(snapshot.loaded_count, 2);
    assert!(snapshot.ml_memory > 0);

    assert!(rt.unload_model(KEY));
    assert!(!rt.unload_model(KEY));
    assert!(rt.get_loaded_model(KEY).is_none());
}

#[tokio::test]
async fn test_unknown_version_is_no_model_available() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);
    let v1 = write_model(&rt.config().models_dir.clone(), "1.0.0", 0.1);
    let err = rt.load_model(&v1, Some("9.9.9")).await.unwrap_err();
    assert!(matches!(err, ModelError::NoModelAvailable { .. }));
}

#[tokio::test]
async fn test_infer_batched_then_shutdown() {
    let dir = TempDir::new().unwrap();
    let rt = runtime(&dir);
    let path = write_model(&rt.config().models_dir.clone(), "1.0.0", 0.1);
    rt.start();

    let out = rt.infer_batched(&path, vec![0.3, 0.6]).await.unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0] > 0.0 && out[0] < 1.0);

    let report = rt.health_report();
    assert_eq!(report.state, HealthState::Healthy);
    assert!(report.ready);
    assert_eq!(report.models_loaded, 1);

    assert_eq!(rt.shutdown(Duration::from_secs(5)).await, ShutdownResult::Complete);
    assert_eq!(
        rt.infer_batched(&path, vec![0.3, 0.6]).await.unwrap_err(),
        ModelError::ShuttingDown
    );
    assert_eq!(rt.load_model(&path, None).await.unwrap_err(), ModelError::ShuttingDown);
    assert!(rt.cache().is_empty());
    assert_eq!(rt.health_report().state, HealthState::Unhealthy);
}
