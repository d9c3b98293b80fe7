//! # redb-backed Catalog Storage
//!
//! A disk-backed catalog store using the redb embedded database.
//!
//! - ACID transactions: a whole ingest batch or a whole per-image commit is
//!   one write transaction, so a crash never leaves half a group merged
//! - Copy-on-write B-trees: readers never see a partial commit
//!
//! Records are stored postcard-encoded. Edges are keyed by
//! `(image, detection, entry)` so one image is one contiguous key range.

use crate::catalog::{
    CatalogRecords, CatalogStore, CommitSummary, Decision, StoreStats, plan_commit,
};
use crate::config::RefusalPolicy;
use crate::{AssociationEdge, CatalogEntry, Detection, DetectionId, EntryId, ImageId, SkymatchError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;

/// Table for detections: DetectionId(u64) -> serialized Detection bytes
const DETECTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("detections");

/// Table for catalog entries: EntryId(u64) -> serialized CatalogEntry bytes
const ENTRIES: TableDefinition<u64, &[u8]> = TableDefinition::new("entries");

/// Table for edges: (image, detection, entry) -> serialized AssociationEdge bytes
const EDGES: TableDefinition<(u64, u64, u64), &[u8]> = TableDefinition::new("edges");

fn io_err(e: impl std::fmt::Display) -> SkymatchError {
    SkymatchError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SkymatchError> {
    postcard::to_allocvec(value).map_err(|e| SkymatchError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SkymatchError> {
    postcard::from_bytes(bytes).map_err(|e| SkymatchError::DeserializationError(e.to_string()))
}

fn edge_key(edge: &AssociationEdge) -> (u64, u64, u64) {
    (edge.image.0, edge.detection.0, edge.entry.0)
}

/// Check an edge against its stored endpoints inside an open transaction.
fn check_edge_endpoints(
    edge: &AssociationEdge,
    detections: &impl ReadableTable<u64, &'static [u8]>,
    entries: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<(), SkymatchError> {
    let detection: Detection = match detections.get(edge.detection.0).map_err(io_err)? {
        Some(data) => decode(data.value())?,
        None => return Err(SkymatchError::DetectionNotFound(edge.detection)),
    };
    if detection.image != edge.image {
        return Err(SkymatchError::InvalidRecord(format!(
            "edge {}-{} claims {} but the detection belongs to {}",
            edge.detection, edge.entry, edge.image, detection.image
        )));
    }
    if entries.get(edge.entry.0).map_err(io_err)?.is_none() {
        return Err(SkymatchError::EntryNotFound(edge.entry));
    }
    Ok(())
}

/// A disk-backed catalog store using redb.
pub struct RedbCatalog {
    db: Database,
}

impl std::fmt::Debug for RedbCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCatalog").finish_non_exhaustive()
    }
}

impl RedbCatalog {
    /// Open or create a catalog database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SkymatchError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(DETECTIONS).map_err(io_err)?;
            let _ = write_txn.open_table(ENTRIES).map_err(io_err)?;
            let _ = write_txn.open_table(EDGES).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Copy every record into a flat set, in key order.
    pub fn records(&self) -> Result<CatalogRecords, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let mut records = CatalogRecords::default();

        let table = read_txn.open_table(DETECTIONS).map_err(io_err)?;
        for row in table.iter().map_err(io_err)? {
            let (_, value) = row.map_err(io_err)?;
            records.detections.push(decode(value.value())?);
        }
        let table = read_txn.open_table(ENTRIES).map_err(io_err)?;
        for row in table.iter().map_err(io_err)? {
            let (_, value) = row.map_err(io_err)?;
            records.entries.push(decode(value.value())?);
        }
        let table = read_txn.open_table(EDGES).map_err(io_err)?;
        for row in table.iter().map_err(io_err)? {
            let (_, value) = row.map_err(io_err)?;
            records.edges.push(decode(value.value())?);
        }

        Ok(records)
    }
}

// =============================================================================
// CATALOGSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl CatalogStore for RedbCatalog {
    fn insert_detection(&mut self, detection: Detection) -> Result<(), SkymatchError> {
        self.insert_records(&CatalogRecords {
            detections: vec![detection],
            ..CatalogRecords::default()
        })
    }

    fn insert_entry(&mut self, entry: CatalogEntry) -> Result<(), SkymatchError> {
        self.insert_records(&CatalogRecords {
            entries: vec![entry],
            ..CatalogRecords::default()
        })
    }

    fn insert_edge(&mut self, edge: AssociationEdge) -> Result<(), SkymatchError> {
        self.insert_records(&CatalogRecords {
            edges: vec![edge],
            ..CatalogRecords::default()
        })
    }

    /// Single write transaction for the whole batch.
    ///
    /// Records are validated before the transaction opens; an edge with a
    /// missing endpoint aborts the transaction, so nothing is stored.
    fn insert_records(&mut self, records: &CatalogRecords) -> Result<(), SkymatchError> {
        for detection in &records.detections {
            detection.validate()?;
        }
        for entry in &records.entries {
            entry.validate()?;
        }

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut det_table = write_txn.open_table(DETECTIONS).map_err(io_err)?;
            let mut entry_table = write_txn.open_table(ENTRIES).map_err(io_err)?;
            let mut edge_table = write_txn.open_table(EDGES).map_err(io_err)?;

            for detection in &records.detections {
                let bytes = encode(detection)?;
                det_table
                    .insert(detection.id.0, bytes.as_slice())
                    .map_err(io_err)?;
            }
            for entry in &records.entries {
                let bytes = encode(entry)?;
                entry_table
                    .insert(entry.id.0, bytes.as_slice())
                    .map_err(io_err)?;
            }
            for edge in &records.edges {
                check_edge_endpoints(edge, &det_table, &entry_table)?;
                let bytes = encode(edge)?;
                edge_table
                    .insert(edge_key(edge), bytes.as_slice())
                    .map_err(io_err)?;
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn detection(&self, id: DetectionId) -> Result<Option<Detection>, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DETECTIONS).map_err(io_err)?;
        match table.get(id.0).map_err(io_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn entry(&self, id: EntryId) -> Result<Option<CatalogEntry>, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ENTRIES).map_err(io_err)?;
        match table.get(id.0).map_err(io_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn edges_for_image(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;

        let mut edges = Vec::new();
        for row in table
            .range((image.0, 0u64, 0u64)..=(image.0, u64::MAX, u64::MAX))
            .map_err(io_err)?
        {
            let (_, value) = row.map_err(io_err)?;
            edges.push(decode(value.value())?);
        }
        Ok(edges)
    }

    fn images(&self) -> Result<Vec<ImageId>, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(EDGES).map_err(io_err)?;

        let mut images = BTreeSet::new();
        for row in table.iter().map_err(io_err)? {
            let (key, _) = row.map_err(io_err)?;
            let (image, _, _) = key.value();
            images.insert(ImageId(image));
        }
        Ok(images.into_iter().collect())
    }

    fn next_entry_id(&self) -> Result<EntryId, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ENTRIES).map_err(io_err)?;
        let last = table.last().map_err(io_err)?.map(|(key, _)| key.value());
        Ok(EntryId(last.map_or(1, |id| id.saturating_add(1))))
    }

    /// Plans against committed state, then writes the plan in one transaction.
    fn commit(
        &mut self,
        image: ImageId,
        decisions: &[Decision],
        policy: RefusalPolicy,
    ) -> Result<CommitSummary, SkymatchError> {
        let plan = plan_commit(&*self, image, decisions, policy)?;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut entry_table = write_txn.open_table(ENTRIES).map_err(io_err)?;
            let mut edge_table = write_txn.open_table(EDGES).map_err(io_err)?;

            for (id, entry) in &plan.entries {
                let bytes = encode(entry)?;
                entry_table.insert(id.0, bytes.as_slice()).map_err(io_err)?;
            }
            for edge in &plan.edges {
                let bytes = encode(edge)?;
                edge_table
                    .insert(edge_key(edge), bytes.as_slice())
                    .map_err(io_err)?;
            }
        }
        write_txn.commit().map_err(io_err)?;

        Ok(plan.summary)
    }

    fn stats(&self) -> Result<StoreStats, SkymatchError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let det_table = read_txn.open_table(DETECTIONS).map_err(io_err)?;
        let entry_table = read_txn.open_table(ENTRIES).map_err(io_err)?;
        let edge_table = read_txn.open_table(EDGES).map_err(io_err)?;

        let mut stats = StoreStats {
            detections: det_table.len().map_err(io_err)? as usize,
            entries: entry_table.len().map_err(io_err)? as usize,
            ..StoreStats::default()
        };
        for row in edge_table.iter().map_err(io_err)? {
            let (_, value) = row.map_err(io_err)?;
            let edge: AssociationEdge = decode(value.value())?;
            stats.count_edge(edge.kind);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Band, ClusterTag, Component, EdgeKind, Measurement, Pairing};
    use tempfile::tempdir;

    fn det(id: u64, ra: f64) -> Detection {
        Detection {
            id: DetectionId(id),
            image: ImageId(4),
            band: Band::default(),
            ra: Measurement::new(ra, 0.1),
            decl: Measurement::new(0.0, 0.1),
            flux: Measurement::new(1.0, 0.1),
        }
    }

    fn records() -> CatalogRecords {
        CatalogRecords {
            detections: vec![det(1, 0.0), det(2, 5.0)],
            entries: vec![
                CatalogEntry::from_detection(EntryId(10), &det(0, 0.0)),
                CatalogEntry::from_detection(EntryId(20), &det(0, 5.0)),
            ],
            edges: vec![
                AssociationEdge::ambiguous(DetectionId(1), EntryId(10), ImageId(4), ClusterTag(2)),
                AssociationEdge::ambiguous(DetectionId(2), EntryId(10), ImageId(4), ClusterTag(2)),
                AssociationEdge::ambiguous(DetectionId(2), EntryId(20), ImageId(4), ClusterTag(2)),
            ],
        }
    }

    #[test]
    fn batch_roundtrip() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbCatalog::open(temp.path().join("test.redb")).expect("open db");
        store.insert_records(&records()).expect("insert");

        assert_eq!(store.records().expect("records"), records());
        assert_eq!(store.images().expect("images"), vec![ImageId(4)]);
        assert_eq!(store.next_entry_id().expect("next"), EntryId(21));
        assert_eq!(store.ambiguous_edges(ImageId(4)).expect("edges").len(), 3);
    }

    #[test]
    fn dangling_edge_aborts_whole_batch() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbCatalog::open(temp.path().join("test.redb")).expect("open db");
        let mut batch = records();
        batch.edges.push(AssociationEdge::ambiguous(
            DetectionId(9),
            EntryId(10),
            ImageId(4),
            ClusterTag(2),
        ));

        let result = store.insert_records(&batch);

        assert!(matches!(result, Err(SkymatchError::DetectionNotFound(_))));
        let stats = store.stats().expect("stats");
        assert_eq!(stats.detections, 0);
        assert_eq!(stats.edges, 0);
    }

    #[test]
    fn persistence() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut store = RedbCatalog::open(&db_path).expect("open db");
            store.insert_records(&records()).expect("insert");
        }

        {
            let store = RedbCatalog::open(&db_path).expect("open db");
            assert_eq!(store.stats().expect("stats").entries, 2);
            assert!(store.detection(DetectionId(2)).expect("get").is_some());
        }
    }

    #[test]
    fn commit_is_visible_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let mut store = RedbCatalog::open(&db_path).expect("open db");
            store.insert_records(&records()).expect("insert");
            let component = Component::new(
                Some(ClusterTag(2)),
                store.ambiguous_edges(ImageId(4)).expect("edges"),
            );
            let decision = Decision::Accept {
                component,
                pairing: Pairing(vec![
                    (DetectionId(1), EntryId(10)),
                    (DetectionId(2), EntryId(20)),
                ]),
            };
            let summary = store
                .commit(ImageId(4), &[decision], RefusalPolicy::Defer)
                .expect("commit");
            assert_eq!(summary.merged_pairs, 2);
        }

        let store = RedbCatalog::open(&db_path).expect("open db");
        let stats = store.stats().expect("stats");
        assert_eq!(stats.edges_of(EdgeKind::Resolved), 2);
        assert_eq!(stats.edges_of(EdgeKind::Rejected), 1);
        let merged = store.entry(EntryId(20)).expect("get").expect("entry");
        assert_eq!(merged.datapoints, 2);
    }

    #[test]
    fn new_sources_get_fresh_ids() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbCatalog::open(temp.path().join("test.redb")).expect("open db");
        store.insert_records(&records()).expect("insert");
        let component = Component::new(
            Some(ClusterTag(2)),
            store.ambiguous_edges(ImageId(4)).expect("edges"),
        );

        let summary = store
            .commit(
                ImageId(4),
                &[Decision::Refuse { component }],
                RefusalPolicy::NewSources,
            )
            .expect("commit");

        assert_eq!(summary.new_entries, 2);
        assert!(store.entry(EntryId(21)).expect("get").is_some());
        assert!(store.entry(EntryId(22)).expect("get").is_some());
        assert!(store.ambiguous_edges(ImageId(4)).expect("edges").is_empty());
    }
}
