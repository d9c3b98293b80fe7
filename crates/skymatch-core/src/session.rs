//! # Session Module
//!
//! One open catalog, whichever backend holds it.
//!
//! ## Storage Backends
//!
//! - `InMemory`: a `MemoryStore` (fast, volatile unless explicitly saved)
//! - `Persistent`: a `RedbCatalog` (disk-backed, ACID)
//!
//! `Session` implements [`CatalogStore`] by delegation, so the pipeline and
//! the ingestor never need to know which one they are talking to.

use crate::catalog::{
    CatalogRecords, CatalogStore, CommitSummary, Decision, MemoryStore, StoreStats,
};
use crate::config::RefusalPolicy;
use crate::ingestor::{IngestSummary, Ingestor};
use crate::metric::DistanceMetric;
use crate::pipeline::{ImageReport, Pipeline};
use crate::storage::RedbCatalog;
use crate::{AssociationEdge, CatalogEntry, Detection, DetectionId, EntryId, ImageId, SkymatchError};
use std::path::Path;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory catalog (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed catalog using redb (ACID, persistent).
    Persistent(RedbCatalog),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// An open catalog plus the high-level operations run against it.
#[derive(Debug, Default)]
pub struct Session {
    backend: StorageBackend,
}

impl Session {
    /// Create a new empty session with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session over an existing in-memory store.
    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
        }
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path. Every ingest and
    /// commit is persisted as it happens.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, SkymatchError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbCatalog::open(path)?),
        })
    }

    /// Check if this session uses persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The in-memory store, if this session has one.
    #[must_use]
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backend {
            StorageBackend::InMemory(store) => Some(store),
            StorageBackend::Persistent(_) => None,
        }
    }

    /// Validate and store a batch of records.
    pub fn ingest(&mut self, records: &CatalogRecords) -> Result<IngestSummary, SkymatchError> {
        Ingestor::ingest(self, records)
    }

    /// Resolve one image.
    pub fn resolve_image<M: DistanceMetric>(
        &mut self,
        pipeline: &Pipeline<M>,
        image: ImageId,
    ) -> Result<ImageReport, SkymatchError> {
        pipeline.process_image(self, image)
    }

    /// Resolve every image that has edges, ascending.
    pub fn resolve_all<M: DistanceMetric>(
        &mut self,
        pipeline: &Pipeline<M>,
    ) -> Result<Vec<(ImageId, Result<ImageReport, SkymatchError>)>, SkymatchError> {
        let images = self.images()?;
        Ok(pipeline.process_images(self, &images))
    }

    /// Copy the whole catalog into a flat record set.
    pub fn records(&self) -> Result<CatalogRecords, SkymatchError> {
        match &self.backend {
            StorageBackend::InMemory(store) => Ok(CatalogRecords::from(store)),
            StorageBackend::Persistent(store) => store.records(),
        }
    }

    fn store(&self) -> &dyn CatalogStore {
        match &self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn CatalogStore {
        match &mut self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }
}

// =============================================================================
// CATALOGSTORE DELEGATION
// =============================================================================

impl CatalogStore for Session {
    fn insert_detection(&mut self, detection: Detection) -> Result<(), SkymatchError> {
        self.store_mut().insert_detection(detection)
    }

    fn insert_entry(&mut self, entry: CatalogEntry) -> Result<(), SkymatchError> {
        self.store_mut().insert_entry(entry)
    }

    fn insert_edge(&mut self, edge: AssociationEdge) -> Result<(), SkymatchError> {
        self.store_mut().insert_edge(edge)
    }

    fn insert_records(&mut self, records: &CatalogRecords) -> Result<(), SkymatchError> {
        self.store_mut().insert_records(records)
    }

    fn detection(&self, id: DetectionId) -> Result<Option<Detection>, SkymatchError> {
        self.store().detection(id)
    }

    fn entry(&self, id: EntryId) -> Result<Option<CatalogEntry>, SkymatchError> {
        self.store().entry(id)
    }

    fn edges_for_image(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError> {
        self.store().edges_for_image(image)
    }

    fn ambiguous_edges(&self, image: ImageId) -> Result<Vec<AssociationEdge>, SkymatchError> {
        self.store().ambiguous_edges(image)
    }

    fn images(&self) -> Result<Vec<ImageId>, SkymatchError> {
        self.store().images()
    }

    fn next_entry_id(&self) -> Result<EntryId, SkymatchError> {
        self.store().next_entry_id()
    }

    fn commit(
        &mut self,
        image: ImageId,
        decisions: &[Decision],
        policy: RefusalPolicy,
    ) -> Result<CommitSummary, SkymatchError> {
        self.store_mut().commit(image, decisions, policy)
    }

    fn stats(&self) -> Result<StoreStats, SkymatchError> {
        self.store().stats()
    }
}

// =============================================================================
// TESTS
// =============================================================================
