//! # Ingestor Module
//!
//! Batch validation and ingestion of catalog records.
//!
//! - Validate the whole batch before any store mutation
//! - Reject malformed records and dangling edges
//! - No inference: edges are stored with the kind and tag they arrive with

use crate::catalog::{CatalogRecords, CatalogStore};
use crate::primitives::MAX_BATCH_RECORDS;
use crate::{DetectionId, EdgeKind, EntryId, ImageId, SkymatchError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Counts of what one batch stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestSummary {
    pub detections: usize,
    pub entries: usize,
    pub edges: usize,
}

/// The Ingestor validates record batches and hands them to a store.
pub struct Ingestor;

impl Ingestor {
    /// Validate a batch against itself and the store.
    ///
    /// A batch is valid if:
    /// - It holds at most `MAX_BATCH_RECORDS` records
    /// - Every measurement is finite with a positive error
    /// - No detection, entry or edge key appears twice
    /// - Every edge's endpoints exist in the batch or the store, and the
    ///   edge's image is its detection's image
    /// - Every ambiguous edge carries a cluster tag
    pub fn validate<S: CatalogStore + ?Sized>(
        store: &S,
        records: &CatalogRecords,
    ) -> Result<(), SkymatchError> {
        if records.len() > MAX_BATCH_RECORDS {
            return Err(SkymatchError::InvalidRecord(format!(
                "batch holds {} records, limit is {}",
                records.len(),
                MAX_BATCH_RECORDS
            )));
        }

        let mut detection_images: BTreeMap<DetectionId, ImageId> = BTreeMap::new();
        for detection in &records.detections {
            detection.validate()?;
            if detection_images
                .insert(detection.id, detection.image)
                .is_some()
            {
                return Err(SkymatchError::InvalidRecord(format!(
                    "{} appears twice in the batch",
                    detection.id
                )));
            }
        }

        let mut entries: BTreeSet<EntryId> = BTreeSet::new();
        for entry in &records.entries {
            entry.validate()?;
            if !entries.insert(entry.id) {
                return Err(SkymatchError::InvalidRecord(format!(
                    "{} appears twice in the batch",
                    entry.id
                )));
            }
        }

        let mut edge_keys = BTreeSet::new();
        for edge in &records.edges {
            if !edge_keys.insert((edge.image, edge.detection, edge.entry)) {
                return Err(SkymatchError::InvalidRecord(format!(
                    "edge {}-{} in {} appears twice in the batch",
                    edge.detection, edge.entry, edge.image
                )));
            }
            if edge.kind == EdgeKind::Ambiguous && edge.cluster.is_none() {
                return Err(SkymatchError::InvalidRecord(format!(
                    "ambiguous edge {}-{} has no cluster tag",
                    edge.detection, edge.entry
                )));
            }

            let image = match detection_images.get(&edge.detection) {
                Some(image) => *image,
                None => {
                    store
                        .detection(edge.detection)?
                        .ok_or(SkymatchError::DetectionNotFound(edge.detection))?
                        .image
                }
            };
            if image != edge.image {
                return Err(SkymatchError::InvalidRecord(format!(
                    "edge {}-{} claims {} but the detection belongs to {}",
                    edge.detection, edge.entry, edge.image, image
                )));
            }
            if !entries.contains(&edge.entry) && store.entry(edge.entry)?.is_none() {
                return Err(SkymatchError::EntryNotFound(edge.entry));
            }
        }

        Ok(())
    }

    /// Validate and store a batch.
    ///
    /// Works with both `MemoryStore` and `RedbCatalog`. Nothing is stored if
    /// validation fails.
    pub fn ingest<S: CatalogStore + ?Sized>(
        store: &mut S,
        records: &CatalogRecords,
    ) -> Result<IngestSummary, SkymatchError> {
        Self::validate(&*store, records)?;
        store.insert_records(records)?;

        tracing::debug!(
            "ingested {} detection(s), {} entr(ies), {} edge(s)",
            records.detections.len(),
            records.entries.len(),
            records.edges.len()
        );

        Ok(IngestSummary {
            detections: records.detections.len(),
            entries: records.entries.len(),
            edges: records.edges.len(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryStore;
    use crate::{AssociationEdge, Band, CatalogEntry, ClusterTag, Detection, Measurement};

    fn det(id: u64) -> Detection {
        Detection {
            id: DetectionId(id),
            image: ImageId(1),
            band: Band::default(),
            ra: Measurement::new(1.0, 0.1),
            decl: Measurement::new(2.0, 0.1),
            flux: Measurement::new(3.0, 0.1),
        }
    }

    fn batch() -> CatalogRecords {
        CatalogRecords {
            detections: vec![det(1), det(2)],
            entries: vec![CatalogEntry::from_detection(EntryId(10), &det(0))],
            edges: vec![
                AssociationEdge::ambiguous(DetectionId(1), EntryId(10), ImageId(1), ClusterTag(1)),
                AssociationEdge::ambiguous(DetectionId(2), EntryId(10), ImageId(1), ClusterTag(1)),
            ],
        }
    }

    #[test]
    fn ingest_valid_batch() {
        let mut store = MemoryStore::new();
        let summary = Ingestor::ingest(&mut store, &batch()).expect("ingest");
        assert_eq!(
            summary,
            IngestSummary {
                detections: 2,
                entries: 1,
                edges: 2
            }
        );
        assert_eq!(store.ambiguous_edges(ImageId(1)).expect("edges").len(), 2);
    }

    #[test]
    fn edges_may_reference_stored_records() {
        let mut store = MemoryStore::new();
        Ingestor::ingest(&mut store, &batch()).expect("first batch");

        let follow_up = CatalogRecords {
            detections: vec![det(3)],
            edges: vec![AssociationEdge::ambiguous(
                DetectionId(3),
                EntryId(10),
                ImageId(1),
                ClusterTag(1),
            )],
            ..CatalogRecords::default()
        };
        assert!(Ingestor::ingest(&mut store, &follow_up).is_ok());
    }

    #[test]
    fn duplicate_detection_rejected() {
        let mut records = batch();
        records.detections.push(det(1));
        assert!(matches!(
            Ingestor::validate(&MemoryStore::new(), &records),
            Err(SkymatchError::InvalidRecord(_))
        ));
    }

    #[test]
    fn untagged_ambiguous_edge_rejected() {
        let mut records = batch();
        records.edges[0].cluster = None;
        assert!(Ingestor::validate(&MemoryStore::new(), &records).is_err());
    }

    #[test]
    fn dangling_edge_rejects_whole_batch() {
        let mut store = MemoryStore::new();
        let mut records = batch();
        records.edges.push(AssociationEdge::ambiguous(
            DetectionId(1),
            EntryId(99),
            ImageId(1),
            ClusterTag(1),
        ));

        let result = Ingestor::ingest(&mut store, &records);

        assert!(matches!(result, Err(SkymatchError::EntryNotFound(_))));
        assert_eq!(store.stats().expect("stats").detections, 0);
    }

    #[test]
    fn wrong_image_rejected() {
        let mut records = batch();
        records.edges[1].image = ImageId(2);
        assert!(Ingestor::validate(&MemoryStore::new(), &records).is_err());
    }
}
