//! # skymatch-core
//!
//! The cross-match disambiguation engine for skymatch - THE LOGIC.
//!
//! Newly observed detections from each sky image are linked to entries of a
//! persistent running catalog. Most links are unambiguous; this crate handles
//! the rest: groups of detections and entries that all fall within matching
//! radius of each other.
//!
//! ## Components
//!
//! - [`GroupFinder`] recovers the exact connected components hiding inside one
//!   coarse cluster tag.
//! - [`GroupResolver`] pairs one component one-to-one using an isolation and
//!   mutual-nearest-neighbour test, or refuses the whole component.
//! - [`Pipeline`] drives both per image against a [`CatalogStore`].
//!
//! ## Architectural Constraints
//!
//! - Deterministic: `BTreeMap`/`BTreeSet` only, no randomness
//! - All-or-nothing: a component is paired completely or not at all
//! - No ambient state: the store and the [`MatchConfig`] are passed in
//! - No async, no network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod catalog;
pub mod config;
pub mod finder;
pub mod formats;
pub mod ingestor;
pub mod metric;
pub mod pipeline;
pub mod primitives;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AssociationEdge, Band, CatalogEntry, ClusterTag, Component, Detection, DetectionId, EdgeKind,
    EntryId, ImageId, Measurement, Pairing, Refusal, Resolution, SkymatchError, Stokes,
};

// =============================================================================
// RE-EXPORTS: Matching Engine
// =============================================================================

pub use config::{MatchConfig, RefusalPolicy};
pub use finder::GroupFinder;
pub use metric::{DistanceMetric, MetricKind, PositionalFluxMetric, PositionalMetric};
pub use pipeline::{ImageReport, Pipeline};
pub use resolver::GroupResolver;

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use catalog::{CatalogRecords, CatalogStore, CommitSummary, Decision, MemoryStore, StoreStats};
pub use ingestor::{IngestSummary, Ingestor};
pub use session::{Session, StorageBackend};
pub use storage::RedbCatalog;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, store_from_bytes, store_to_bytes};
