//! # Catalog Store
//!
//! The seam between the matching engine and whatever holds the running
//! catalog. This module defines the `CatalogStore` trait, the per-image
//! commit protocol, and `MemoryStore`, the in-memory implementation.
//!
//! All data structures use `BTreeMap` for deterministic ordering.
//!
//! ## Commit Protocol
//!
//! The pipeline never mutates the store while resolving. It hands the store
//! one list of [`Decision`]s per image; the store plans every change first
//! (reading only), and writes nothing unless the whole plan is valid.

use crate::config::RefusalPolicy;
use crate::{
    AssociationEdge, CatalogEntry, Component, Detection, DetectionId, EdgeKind, EntryId, ImageId,
    Pairing, SkymatchError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// DECISIONS & SUMMARIES
// =============================================================================

/// What the pipeline concluded about one component.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Merge every pair; the component's other edges are rejected.
    Accept {
        component: Component,
        pairing: Pairing,
    },
    /// No confident pairing; handled according to the [`RefusalPolicy`].
    Refuse { component: Component },
}

impl Decision {
    #[must_use]
    pub fn component(&self) -> &Component {
        match self {
            Decision::Accept { component, .. } | Decision::Refuse { component } => component,
        }
    }
}

/// What one commit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommitSummary {
    pub image: Option<ImageId>,
    pub accepted_components: usize,
    pub deferred_components: usize,
    pub promoted_components: usize,
    pub merged_pairs: usize,
    pub new_entries: usize,
}

/// Record counts of a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub detections: usize,
    pub entries: usize,
    pub edges: usize,
    /// Edge count per kind name; kinds with no edges are omitted.
    pub edges_by_kind: BTreeMap<String, usize>,
}

impl StoreStats {
    /// Count of edges of one kind.
    #[must_use]
    pub fn edges_of(&self, kind: EdgeKind) -> usize {
        self.edges_by_kind.get(kind.name()).copied().unwrap_or(0)
    }

    pub(crate) fn count_edge(&mut self, kind: EdgeKind) {
        self.edges = self.edges.saturating_add(1);
        let slot = self.edges_by_kind.entry(kind.name().to_string()).or_default();
        *slot = slot.saturating_add(1);
    }
}

/// A flat, serialisable set of records: the ingest batch format and the
/// snapshot format of [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogRecords {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub entries: Vec<CatalogEntry>,
    #[serde(default)]
    pub edges: Vec<AssociationEdge>,
}

impl CatalogRecords {
    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detections.len() + self.entries.len() + self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// CATALOGSTORE TRAIT
// =============================================================================

/// The CatalogStore trait defines the operations the pipeline needs from
/// the running catalog.
///
/// All fallible operations return `Result<T, SkymatchError>` to support both
/// in-memory and persistent backends uniformly.
pub trait CatalogStore {
    /// Store a detection. Re-inserting an id overwrites it.
    fn insert_detection(&mut self, detection: Detection) -> Result<(), SkymatchError>;

    /// Store a catalog entry. Re-inserting an id overwrites it.
    fn insert_entry(&mut self, entry: CatalogEntry) -> Result<(), SkymatchError>;

    /// Store an edge. Both endpoints must already exist.
    fn insert_edge(&mut self, edge: AssociationEdge) -> Result<(), SkymatchError>;

    /// Store a whole batch (detections, then entries, then edges).
    ///
    /// The default stops at the first failing record and keeps what it
    /// already stored. `MemoryStore` and `RedbCatalog` override it to store
    /// all or nothing.
    fn insert_records(&mut self, records: &CatalogRecords) -> Result<(), SkymatchError> {
        for detection in &records.detections {
            self.insert_detection(detection.clone())?;
        }
        for entry in &records.entries {
            self.insert_entry(entry.clone())?;
        }
        for edge in &records.edges {
            self.insert_edge(edge.clone())?;
        }
        Ok(())
    }

    /// Lookup a detection.
    fn detection(&self, id: DetectionId) -> Result<Option<Detection>, SkymatchError>;

    /// Lookup a catalog entry.
    fn entry(&self, id: EntryId) -> Result<Option<CatalogEntry>, SkymatchError>;

    /// All edges of one image, ordered by detection then entry.
    fn edges_for_image(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError>;

    /// The ambiguous edges of one image, in the same order.
    fn ambiguous_edges(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError> {
        Ok(self
            .edges_for_image(image)?
            .into_iter()
            .filter(|e| e.kind == EdgeKind::Ambiguous)
            .collect())
    }

    /// Images that have at least one edge, ascending.
    fn images(&self) -> Result<Vec<ImageId>, SkymatchError>;

    /// The id the next newly created entry will receive.
    fn next_entry_id(&self) -> Result<EntryId, SkymatchError>;

    /// Apply every decision for one image atomically.
    fn commit(
        &mut self,
        image: ImageId,
        decisions: &[Decision],
        policy: RefusalPolicy,
    ) -> Result<CommitSummary, SkymatchError>;

    /// Record counts.
    fn stats(&self) -> Result<StoreStats, SkymatchError>;
}

// =============================================================================
// COMMIT PLANNING
// =============================================================================

/// Every write one commit will perform, computed without mutating anything.
#[derive(Debug, Default)]
pub(crate) struct CommitPlan {
    /// Final state of every touched entry (merged or newly created).
    pub entries: BTreeMap<EntryId, CatalogEntry>,
    /// Final state of every touched or created edge.
    pub edges: Vec<AssociationEdge>,
    pub summary: CommitSummary,
}

/// Validate and plan a commit against the current store contents.
pub(crate) fn plan_commit<S: CatalogStore + ?Sized>(
    store: &S,
    image: ImageId,
    decisions: &[Decision],
    policy: RefusalPolicy,
) -> Result<CommitPlan, SkymatchError> {
    let mut plan = CommitPlan {
        summary: CommitSummary {
            image: Some(image),
            ..CommitSummary::default()
        },
        ..CommitPlan::default()
    };
    let mut next_entry = store.next_entry_id()?.0;

    for decision in decisions {
        let component = decision.component();
        if let Some(edge) = component.edges.iter().find(|e| e.image != image) {
            return Err(SkymatchError::MalformedComponent(format!(
                "edge {}-{} belongs to {}, not {}",
                edge.detection, edge.entry, edge.image, image
            )));
        }

        match decision {
            Decision::Accept { component, pairing } => {
                let keys: BTreeSet<_> = component.edges.iter().map(AssociationEdge::key).collect();
                for &(det_id, entry_id) in pairing.pairs() {
                    if !keys.contains(&(det_id, entry_id)) {
                        return Err(SkymatchError::MalformedComponent(format!(
                            "pair {}-{} is not an edge of the component",
                            det_id, entry_id
                        )));
                    }
                    let detection = store
                        .detection(det_id)?
                        .ok_or(SkymatchError::DetectionNotFound(det_id))?;
                    let mut entry = match plan.entries.remove(&entry_id) {
                        Some(e) => e,
                        None => store
                            .entry(entry_id)?
                            .ok_or(SkymatchError::EntryNotFound(entry_id))?,
                    };
                    entry.merge(&detection);
                    plan.entries.insert(entry_id, entry);
                    plan.summary.merged_pairs += 1;
                }
                for edge in &component.edges {
                    let kind = if pairing.contains(edge.detection, edge.entry) {
                        EdgeKind::Resolved
                    } else {
                        EdgeKind::Rejected
                    };
                    plan.edges.push(AssociationEdge {
                        cluster: None,
                        kind,
                        ..edge.clone()
                    });
                }
                plan.summary.accepted_components += 1;
            }
            Decision::Refuse { .. } if policy == RefusalPolicy::Defer => {
                plan.summary.deferred_components += 1;
            }
            Decision::Refuse { component } => {
                for entry_id in component.entries() {
                    let mut entry = match plan.entries.remove(&entry_id) {
                        Some(e) => e,
                        None => store
                            .entry(entry_id)?
                            .ok_or(SkymatchError::EntryNotFound(entry_id))?,
                    };
                    entry.group_head = None;
                    plan.entries.insert(entry_id, entry);
                }
                for edge in &component.edges {
                    plan.edges.push(AssociationEdge {
                        cluster: None,
                        kind: EdgeKind::Rejected,
                        ..edge.clone()
                    });
                }
                for det_id in component.detections() {
                    let detection = store
                        .detection(det_id)?
                        .ok_or(SkymatchError::DetectionNotFound(det_id))?;
                    let entry_id = EntryId(next_entry);
                    next_entry = next_entry.saturating_add(1);
                    plan.entries
                        .insert(entry_id, CatalogEntry::from_detection(entry_id, &detection));
                    plan.edges.push(AssociationEdge {
                        detection: det_id,
                        entry: entry_id,
                        image,
                        cluster: None,
                        kind: EdgeKind::OneToOne,
                    });
                    plan.summary.new_entries += 1;
                }
                plan.summary.promoted_components += 1;
            }
        }
    }

    Ok(plan)
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-memory catalog store.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    detections: BTreeMap<DetectionId, Detection>,
    entries: BTreeMap<EntryId, CatalogEntry>,
    /// Edges keyed by (image, detection, entry) so one image is one range.
    edges: BTreeMap<(ImageId, DetectionId, EntryId), AssociationEdge>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// All edges in (image, detection, entry) order.
    pub fn edges(&self) -> impl Iterator<Item = &AssociationEdge> {
        self.edges.values()
    }

    fn edge_key(edge: &AssociationEdge) -> (ImageId, DetectionId, EntryId) {
        (edge.image, edge.detection, edge.entry)
    }
}

impl CatalogStore for MemoryStore {
    fn insert_detection(&mut self, detection: Detection) -> Result<(), SkymatchError> {
        detection.validate()?;
        self.detections.insert(detection.id, detection);
        Ok(())
    }

    fn insert_entry(&mut self, entry: CatalogEntry) -> Result<(), SkymatchError> {
        entry.validate()?;
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    fn insert_edge(&mut self, edge: AssociationEdge) -> Result<(), SkymatchError> {
        let image = self.detections.get(&edge.detection).map(|d| d.image);
        check_endpoints(&edge, image, self.entries.contains_key(&edge.entry))?;
        self.edges.insert(Self::edge_key(&edge), edge);
        Ok(())
    }

    /// Validates the whole batch against itself and the store, then stores it.
    fn insert_records(&mut self, records: &CatalogRecords) -> Result<(), SkymatchError> {
        for detection in &records.detections {
            detection.validate()?;
        }
        for entry in &records.entries {
            entry.validate()?;
        }

        let batch_images: BTreeMap<DetectionId, ImageId> = records
            .detections
            .iter()
            .map(|d| (d.id, d.image))
            .collect();
        let batch_entries: BTreeSet<EntryId> = records.entries.iter().map(|e| e.id).collect();
        for edge in &records.edges {
            let image = batch_images
                .get(&edge.detection)
                .copied()
                .or_else(|| self.detections.get(&edge.detection).map(|d| d.image));
            let entry_known =
                batch_entries.contains(&edge.entry) || self.entries.contains_key(&edge.entry);
            check_endpoints(edge, image, entry_known)?;
        }

        for detection in &records.detections {
            self.detections.insert(detection.id, detection.clone());
        }
        for entry in &records.entries {
            self.entries.insert(entry.id, entry.clone());
        }
        for edge in &records.edges {
            self.edges.insert(Self::edge_key(edge), edge.clone());
        }
        Ok(())
    }

    fn detection(&self, id: DetectionId) -> Result<Option<Detection>, SkymatchError> {
        Ok(self.detections.get(&id).cloned())
    }

    fn entry(&self, id: EntryId) -> Result<Option<CatalogEntry>, SkymatchError> {
        Ok(self.entries.get(&id).cloned())
    }

    fn edges_for_image(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError> {
        let lo = (image, DetectionId(0), EntryId(0));
        let hi = (image, DetectionId(u64::MAX), EntryId(u64::MAX));
        Ok(self.edges.range(lo..=hi).map(|(_, e)| e.clone()).collect())
    }

    fn images(&self) -> Result<Vec<ImageId>, SkymatchError> {
        let images: BTreeSet<ImageId> = self.edges.keys().map(|(image, _, _)| *image).collect();
        Ok(images.into_iter().collect())
    }

    fn next_entry_id(&self) -> Result<EntryId, SkymatchError> {
        Ok(EntryId(
            self.entries
                .keys()
                .next_back()
                .map_or(1, |id| id.0.saturating_add(1)),
        ))
    }

    fn commit(
        &mut self,
        image: ImageId,
        decisions: &[Decision],
        policy: RefusalPolicy,
    ) -> Result<CommitSummary, SkymatchError> {
        let plan = plan_commit(&*self, image, decisions, policy)?;

        self.entries.extend(plan.entries);
        for edge in plan.edges {
            self.edges.insert(Self::edge_key(&edge), edge);
        }

        Ok(plan.summary)
    }

    fn stats(&self) -> Result<StoreStats, SkymatchError> {
        let mut stats = StoreStats {
            detections: self.detections.len(),
            entries: self.entries.len(),
            ..StoreStats::default()
        };
        for edge in self.edges.values() {
            stats.count_edge(edge.kind);
        }
        Ok(stats)
    }
}

/// Check an edge against the image of its detection (`None` if the
/// detection is unknown) and whether its entry exists.
fn check_endpoints(
    edge: &AssociationEdge,
    detection_image: Option<ImageId>,
    entry_known: bool,
) -> Result<(), SkymatchError> {
    let image = detection_image.ok_or(SkymatchError::DetectionNotFound(edge.detection))?;
    if image != edge.image {
        return Err(SkymatchError::InvalidRecord(format!(
            "edge {}-{} claims {} but the detection belongs to {}",
            edge.detection, edge.entry, edge.image, image
        )));
    }
    if !entry_known {
        return Err(SkymatchError::EntryNotFound(edge.entry));
    }
    Ok(())
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

impl From<&MemoryStore> for CatalogRecords {
    fn from(store: &MemoryStore) -> Self {
        Self {
            detections: store.detections.values().cloned().collect(),
            entries: store.entries.values().cloned().collect(),
            edges: store.edges.values().cloned().collect(),
        }
    }
}

impl TryFrom<CatalogRecords> for MemoryStore {
    type Error = SkymatchError;

    fn try_from(records: CatalogRecords) -> Result<Self, Self::Error> {
        let mut store = MemoryStore::new();
        store.insert_records(&records)?;
        Ok(store)
    }
}

// =============================================================================
// TESTS
// =============================================================================
