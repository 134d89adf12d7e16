//! Artifact store: publish, latest, integrity and retention.

use std::path::Path;

use mscore::store::{
    ArtifactMetadata, ArtifactStore, EntryHealthStatus, EntryStatus, RegistryEntry, StoreConfig,
    INDEX_FILE,
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> ArtifactStore {
    ArtifactStore::open(StoreConfig {
        root: dir.path().join("registry"),
        ..Default::default()
    })
    .unwrap()
}

fn artifact(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn publish(
    store: &ArtifactStore,
    dir: &TempDir,
    name: &str,
    file: &str,
    content: &[u8],
) -> RegistryEntry {
    let source = artifact(dir.path(), file, content);
    store
        .publish(name, &source, ArtifactMetadata::default())
        .unwrap()
}

fn version_dirs(store: &ArtifactStore, name: &str) -> Vec<String> {
    let mut dirs: Vec<String> = std::fs::read_dir(store.root().join(name))
        .unwrap()
        .flatten()
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn test_publish_latest_prune_scenario() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let first = publish(
        &store,
        &dir,
        "strategy",
        "strategy.ES.momentum.trend.v1.0.0+abcd1234.onnx",
        b"model-v1.0.0",
    );
    assert_eq!(store.get_latest("strategy").unwrap(), first);

    let second = publish(
        &store,
        &dir,
        "strategy",
        "strategy.ES.momentum.trend.v1.0.1+ef567890.onnx",
        b"model-v1.0.1",
    );
    let latest = store.get_latest("strategy").unwrap();
    assert_eq!(latest.version, second.version);
    assert!(latest
        .original_path
        .ends_with("strategy.ES.momentum.trend.v1.0.1+ef567890.onnx"));
    assert!(second.version > first.version);

    let report = store.prune(1).unwrap();
    assert_eq!(
        report.removed,
        vec![("strategy".to_string(), first.version.clone())]
    );
    assert_eq!(version_dirs(&store, "strategy"), vec![second.version.clone()]);
    assert!(store.root().join(INDEX_FILE).exists());
}

#[test]
fn test_get_latest_missing_model() {
    let dir = TempDir::new().unwrap();
    assert!(open(&dir).get_latest("nothing").is_none());
}

#[test]
fn test_version_id_format() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let entry = publish(&store, &dir, "alpha", "a.bin", b"alpha");
    let (ts, hash8) = entry.version.split_once('-').unwrap();
    assert_eq!(ts.len(), 20);
    assert!(ts.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(hash8, &entry.hash[..8]);
    assert_eq!(entry.hash, entry.hash.to_uppercase());
    assert_eq!(entry.status, EntryStatus::Registered);
}

#[test]
fn test_corruption_flags_exactly_that_model() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let alpha = publish(&store, &dir, "alpha", "a.bin", b"alpha weights");
    publish(&store, &dir, "beta", "b.bin", b"beta weights");

    let report = store.health_check().unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.entries.len(), 2);

    let mut bytes = std::fs::read(&alpha.registry_path).unwrap();
    bytes[0] ^= 0xFF;
    std::fs::write(&alpha.registry_path, bytes).unwrap();

    let report = store.health_check().unwrap();
    let issues: Vec<_> = report.issues().collect();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].model_name, "alpha");
    assert!(matches!(issues[0].status, EntryHealthStatus::HashMismatch { .. }));
    assert!(report.entry("beta").unwrap().is_healthy());
}

#[test]
fn test_missing_artifact_reported() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let entry = publish(&store, &dir, "alpha", "a.bin", b"alpha");
    std::fs::remove_file(&entry.registry_path).unwrap();

    let report = store.health_check().unwrap();
    assert_eq!(
        report.entry("alpha").unwrap().status,
        EntryHealthStatus::Missing
    );
}

#[test]
fn test_prune_never_deletes_active_version() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let old = publish(&store, &dir, "alpha", "a1.bin", b"one");
    publish(&store, &dir, "alpha", "a2.bin", b"two");
    let newest = publish(&store, &dir, "alpha", "a3.bin", b"three");
    store.promote("alpha", &old.version).unwrap();

    let report = store.prune(1).unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(
        report.kept_active,
        vec![("alpha".to_string(), old.version.clone())]
    );
    assert_eq!(version_dirs(&store, "alpha"), vec![old.version, newest.version]);
}

#[test]
fn test_promote_deprecates_previous_active() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let one = publish(&store, &dir, "alpha", "a1.bin", b"one");
    let two = publish(&store, &dir, "alpha", "a2.bin", b"two");
    store.promote("alpha", &one.version).unwrap();
    store.promote("alpha", &two.version).unwrap();

    let versions = store.list_versions("alpha").unwrap();
    let status = |v: &str| versions.iter().find(|e| e.version == v).unwrap().status;
    assert_eq!(status(&one.version), EntryStatus::Deprecated);
    assert_eq!(status(&two.version), EntryStatus::Active);
    assert!(store.promote("alpha", "19990101000000000000-deadbeef").is_err());
}

#[test]
fn test_compressed_publish_stays_verifiable() {
    let dir = TempDir::new().unwrap();
    let store = ArtifactStore::open(StoreConfig {
        root: dir.path().join("registry"),
        compress: true,
        ..Default::default()
    })
    .unwrap();
    let content = b"compressible compressible compressible".to_vec();
    let entry = publish(&store, &dir, "alpha", "a.bin", &content);

    assert!(entry.is_compressed);
    assert!(!entry.registry_path.exists());
    assert!(entry.artifact_path().exists());
    assert_eq!(store.read_artifact(&entry).unwrap(), content);
    assert!(store.health_check().unwrap().is_healthy());
}

#[test]
fn test_publish_missing_source_is_error() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let absent = dir.path().join("absent.bin");
    assert!(store
        .publish("alpha", &absent, ArtifactMetadata::default())
        .is_err());
    assert!(store.get_latest("alpha").is_none());
}
