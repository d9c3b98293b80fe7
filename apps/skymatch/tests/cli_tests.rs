//! Integration tests for the skymatch command implementations.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use skymatch::cli::{
    Backend, cmd_config, cmd_entry, cmd_ingest, cmd_init, cmd_resolve, cmd_status, load_config,
    load_or_create_session,
};
use skymatch_core::{
    AssociationEdge, Band, CatalogEntry, CatalogRecords, CatalogStore, ClusterTag, Detection,
    DetectionId, EntryId, ImageId, MatchConfig, Measurement, MetricKind, RefusalPolicy,
    SkymatchError,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FIXTURES
// =============================================================================

fn detection(id: u64, ra: f64) -> Detection {
    Detection {
        id: DetectionId(id),
        image: ImageId(2),
        band: Band::default(),
        ra: Measurement::new(ra, 0.1),
        decl: Measurement::new(10.0, 0.1),
        flux: Measurement::new(1.0, 0.1),
    }
}

/// One detection sitting on one entry: resolves trivially.
fn single_pair() -> CatalogRecords {
    CatalogRecords {
        detections: vec![detection(1, 10.0)],
        entries: vec![CatalogEntry::from_detection(EntryId(5), &detection(1, 10.0))],
        edges: vec![AssociationEdge::ambiguous(
            DetectionId(1),
            EntryId(5),
            ImageId(2),
            ClusterTag(1),
        )],
    }
}

/// Two detections competing for one entry: always refused.
fn unbalanced_group() -> CatalogRecords {
    CatalogRecords {
        detections: vec![detection(1, 10.0), detection(2, 10.001)],
        entries: vec![CatalogEntry::from_detection(EntryId(7), &detection(1, 10.0))],
        edges: vec![
            AssociationEdge::ambiguous(DetectionId(1), EntryId(7), ImageId(2), ClusterTag(1)),
            AssociationEdge::ambiguous(DetectionId(2), EntryId(7), ImageId(2), ClusterTag(1)),
        ],
    }
}

fn write_batch(dir: &Path, records: &CatalogRecords) -> PathBuf {
    let path = dir.join("batch.json");
    std::fs::write(&path, serde_json::to_vec_pretty(records).unwrap()).unwrap();
    path
}

// =============================================================================
// BACKEND & CONFIG
// =============================================================================

#[test]
fn test_backend_names() {
    assert_eq!(Backend::parse("file").unwrap(), Backend::File);
    assert_eq!(Backend::parse("redb").unwrap(), Backend::Redb);
    assert_eq!(Backend::Redb.name(), "redb");
    assert!(matches!(
        Backend::parse("sqlite"),
        Err(SkymatchError::InvalidConfig(_))
    ));
}

#[test]
fn test_load_config_defaults_without_file() {
    let config = load_config(None).unwrap();
    assert_eq!(config, MatchConfig::default());
    cmd_config(&config, true).unwrap();
}

#[test]
fn test_load_config_from_toml() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("match.toml");
    std::fs::write(
        &path,
        "metric = \"positional+flux\"\nrefusal = \"new-sources\"\n",
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.metric, MetricKind::PositionalFlux);
    assert_eq!(config.refusal, RefusalPolicy::NewSources);
    cmd_config(&config, false).unwrap();
}

#[test]
fn test_load_config_rejects_bad_threshold() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("match.toml");
    std::fs::write(&path, "isolation_threshold = 1.5\n").unwrap();

    assert!(matches!(
        load_config(Some(&path)),
        Err(SkymatchError::InvalidConfig(_))
    ));
}

// =============================================================================
// INIT
// =============================================================================

#[test]
fn test_init_refuses_existing_database_without_force() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.skym");

    cmd_init(&db, Backend::File, false).unwrap();
    assert!(db.exists());
    assert!(cmd_init(&db, Backend::File, false).is_err());
    cmd_init(&db, Backend::File, true).unwrap();
}

// =============================================================================
// FILE BACKEND
// =============================================================================

#[test]
fn test_file_backend_ingest_and_resolve() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.skym");
    let batch = write_batch(temp.path(), &single_pair());

    cmd_init(&db, Backend::File, false).unwrap();
    cmd_ingest(&db, Backend::File, false, &batch).unwrap();

    let session = load_or_create_session(&db, Backend::File).unwrap();
    assert_eq!(session.stats().unwrap().edges, 1);

    cmd_resolve(&db, Backend::File, false, &MatchConfig::default(), None).unwrap();

    let session = load_or_create_session(&db, Backend::File).unwrap();
    let entry = session.entry(EntryId(5)).unwrap().unwrap();
    assert_eq!(entry.datapoints, 2);
    assert!(session.ambiguous_edges(ImageId(2)).unwrap().is_empty());
    cmd_entry(&db, Backend::File, true, 5).unwrap();
}

#[test]
fn test_file_backend_accepts_json_records() {
    let temp = tempfile::tempdir().unwrap();
    let db = write_batch(temp.path(), &single_pair());

    let session = load_or_create_session(&db, Backend::File).unwrap();
    assert_eq!(session.records().unwrap(), single_pair());
}

#[test]
fn test_file_backend_rejects_garbage() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.skym");
    std::fs::write(&db, b"not a catalog").unwrap();

    assert!(matches!(
        load_or_create_session(&db, Backend::File),
        Err(SkymatchError::DeserializationError(_))
    ));
}

#[test]
fn test_ingest_rejects_missing_file() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.skym");

    assert!(matches!(
        cmd_ingest(&db, Backend::File, false, &temp.path().join("missing.json")),
        Err(SkymatchError::IoError(_))
    ));
}

#[test]
fn test_new_sources_policy_creates_entries() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.skym");
    let batch = write_batch(temp.path(), &unbalanced_group());
    let config = MatchConfig {
        refusal: RefusalPolicy::NewSources,
        ..MatchConfig::default()
    };

    cmd_ingest(&db, Backend::File, false, &batch).unwrap();
    cmd_resolve(&db, Backend::File, true, &config, Some(2)).unwrap();

    let session = load_or_create_session(&db, Backend::File).unwrap();
    assert_eq!(session.stats().unwrap().entries, 3);
    assert!(session.entry(EntryId(8)).unwrap().is_some());
    assert!(session.entry(EntryId(9)).unwrap().is_some());
}

// =============================================================================
// REDB BACKEND
// =============================================================================

#[test]
fn test_redb_backend_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.redb");
    let batch = write_batch(temp.path(), &unbalanced_group());

    cmd_init(&db, Backend::Redb, false).unwrap();
    cmd_ingest(&db, Backend::Redb, true, &batch).unwrap();
    cmd_resolve(&db, Backend::Redb, false, &MatchConfig::default(), Some(2)).unwrap();
    cmd_status(&db, Backend::Redb, true).unwrap();

    // Deferred: the group stays ambiguous and the entry untouched
    let session = load_or_create_session(&db, Backend::Redb).unwrap();
    assert!(session.is_persistent());
    assert_eq!(session.ambiguous_edges(ImageId(2)).unwrap().len(), 2);
    assert_eq!(session.entry(EntryId(7)).unwrap().unwrap().datapoints, 1);
}

#[test]
fn test_entry_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let db = temp.path().join("catalog.redb");

    assert!(matches!(
        cmd_entry(&db, Backend::Redb, false, 99),
        Err(SkymatchError::EntryNotFound(EntryId(99)))
    ));
}
