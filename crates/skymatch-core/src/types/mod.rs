//! # Core Type Definitions
//!
//! This module contains the data contract shared by every skymatch component:
//! - Identifiers (`DetectionId`, `EntryId`, `ImageId`, `ClusterTag`)
//! - Measurements and bands (`Measurement`, `Band`, `Stokes`)
//! - Records (`Detection`, `CatalogEntry`)
//! - Association graph (`AssociationEdge`, `EdgeKind`, `Component`)
//! - Resolution output (`Pairing`, `Resolution`, `Refusal`)
//! - Error types (`SkymatchError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers implement `Ord` and every collection in this module is a
//! `BTreeMap`/`BTreeSet`, so iteration order never depends on hashing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a single-epoch detection (extracted source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DetectionId(pub u64);

/// Identifier of a running-catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// Identifier of the image a detection was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId(pub u64);

/// Coarse pre-clustering label (`group_head_id`) shared by edges suspected
/// of mutual ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterTag(pub u64);

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "det:{}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image:{}", self.0)
    }
}

impl fmt::Display for ClusterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster:{}", self.0)
    }
}

// =============================================================================
// MEASUREMENTS
// =============================================================================

/// A measured value together with its 1-sigma error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub error: f64,
}

impl Measurement {
    /// Create a new measurement.
    #[must_use]
    pub const fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// A measurement is usable when both fields are finite and the error is
    /// strictly positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.error.is_finite() && self.error > 0.0
    }

    /// Inverse-variance weighted mean of two measurements.
    ///
    /// The result error is `sqrt(1 / (w_a + w_b))` with `w = 1 / error²`.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        let w_self = self.error.powi(-2);
        let w_other = other.error.powi(-2);
        let total = w_self + w_other;
        Self {
            value: (self.value * w_self + other.value * w_other) / total,
            error: total.recip().sqrt(),
        }
    }
}

/// Polarisation product a flux was measured in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Stokes {
    #[default]
    I,
    Q,
    U,
    V,
}

/// Frequency band plus Stokes parameter; fluxes are only comparable within one band.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Band {
    /// Frequency band index as assigned by the image ingest.
    pub frequency: u32,
    pub stokes: Stokes,
}

impl Band {
    #[must_use]
    pub const fn new(frequency: u32, stokes: Stokes) -> Self {
        Self { frequency, stokes }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// One source measurement in one image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    /// Owning image.
    pub image: ImageId,
    /// Band of the owning image.
    #[serde(default)]
    pub band: Band,
    pub ra: Measurement,
    pub decl: Measurement,
    /// Integrated flux.
    pub flux: Measurement,
}

impl Detection {
    /// Check that every measurement is finite with a positive error.
    pub fn validate(&self) -> Result<(), SkymatchError> {
        for (name, m) in [("ra", &self.ra), ("decl", &self.decl), ("flux", &self.flux)] {
            if !m.is_valid() {
                return Err(SkymatchError::InvalidRecord(format!(
                    "{} has unusable {}: {:?}",
                    self.id, name, m
                )));
            }
        }
        Ok(())
    }
}

/// Serializes a band-keyed flux map as a list, since JSON object keys must be strings.
mod band_fluxes {
    use super::{Band, Measurement};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct BandFlux {
        band: Band,
        flux: Measurement,
    }

    pub fn serialize<S: Serializer>(
        fluxes: &BTreeMap<Band, Measurement>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(fluxes.iter().map(|(band, flux)| BandFlux {
            band: *band,
            flux: *flux,
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Band, Measurement>, D::Error> {
        let list = Vec::<BandFlux>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|e| (e.band, e.flux)).collect())
    }
}

/// A persistent, cross-epoch source identity in the running catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: EntryId,
    /// Weighted-mean right ascension.
    pub ra: Measurement,
    /// Weighted-mean declination.
    pub decl: Measurement,
    /// Weighted-mean flux per band/stokes.
    #[serde(default, with = "band_fluxes")]
    pub fluxes: BTreeMap<Band, Measurement>,
    /// Number of detections merged into this entry.
    pub datapoints: u32,
    /// Set while the entry belongs to an unresolved ambiguous cluster.
    #[serde(default)]
    pub group_head: Option<ClusterTag>,
}

impl CatalogEntry {
    /// Seed a new entry from a detection that matched nothing.
    #[must_use]
    pub fn from_detection(id: EntryId, detection: &Detection) -> Self {
        let mut fluxes = BTreeMap::new();
        fluxes.insert(detection.band, detection.flux);
        Self {
            id,
            ra: detection.ra,
            decl: detection.decl,
            fluxes,
            datapoints: 1,
            group_head: None,
        }
    }

    /// Weighted-mean flux in the given band, if this entry has been seen there.
    #[must_use]
    pub fn flux_in(&self, band: Band) -> Option<&Measurement> {
        self.fluxes.get(&band)
    }

    /// Fold a re-observation into the weighted means.
    ///
    /// Clears the cluster tag and increments `datapoints` (saturating).
    pub fn merge(&mut self, detection: &Detection) {
        self.ra = self.ra.combine(&detection.ra);
        self.decl = self.decl.combine(&detection.decl);
        let flux = match self.fluxes.get(&detection.band) {
            Some(current) => current.combine(&detection.flux),
            None => detection.flux,
        };
        self.fluxes.insert(detection.band, flux);
        self.datapoints = self.datapoints.saturating_add(1);
        self.group_head = None;
    }

    /// Check that every measurement is finite with a positive error.
    pub fn validate(&self) -> Result<(), SkymatchError> {
        let positional = [("ra", &self.ra), ("decl", &self.decl)];
        if let Some((name, m)) = positional.into_iter().find(|(_, m)| !m.is_valid()) {
            return Err(SkymatchError::InvalidRecord(format!(
                "{} has unusable {}: {:?}",
                self.id, name, m
            )));
        }
        if let Some((band, m)) = self.fluxes.iter().find(|(_, m)| !m.is_valid()) {
            return Err(SkymatchError::InvalidRecord(format!(
                "{} has unusable flux in {:?}: {:?}",
                self.id, band, m
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ASSOCIATION GRAPH
// =============================================================================

/// Classification of a candidate link.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    #[default]
    Unclassified,
    OneToOne,
    OneToMany,
    ManyToOne,
    /// Pending group resolution.
    Ambiguous,
    Resolved,
    Rejected,
}

impl EdgeKind {
    /// All kinds, in declaration order.
    pub const ALL: [EdgeKind; 7] = [
        EdgeKind::Unclassified,
        EdgeKind::OneToOne,
        EdgeKind::OneToMany,
        EdgeKind::ManyToOne,
        EdgeKind::Ambiguous,
        EdgeKind::Resolved,
        EdgeKind::Rejected,
    ];

    /// Stable lowercase name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            EdgeKind::Unclassified => "unclassified",
            EdgeKind::OneToOne => "one-to-one",
            EdgeKind::OneToMany => "one-to-many",
            EdgeKind::ManyToOne => "many-to-one",
            EdgeKind::Ambiguous => "ambiguous",
            EdgeKind::Resolved => "resolved",
            EdgeKind::Rejected => "rejected",
        }
    }
}

/// A candidate link between one detection and one catalog entry.
///
/// `kind` and `cluster` are the only fields the matching engine rewrites.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssociationEdge {
    pub detection: DetectionId,
    pub entry: EntryId,
    pub image: ImageId,
    #[serde(default)]
    pub cluster: Option<ClusterTag>,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl AssociationEdge {
    /// Create an ambiguous edge carrying a cluster tag.
    #[must_use]
    pub fn ambiguous(
        detection: DetectionId,
        entry: EntryId,
        image: ImageId,
        cluster: ClusterTag,
    ) -> Self {
        Self {
            detection,
            entry,
            image,
            cluster: Some(cluster),
            kind: EdgeKind::Ambiguous,
        }
    }

    /// The (detection, entry) key identifying this edge within an image.
    #[must_use]
    pub fn key(&self) -> (DetectionId, EntryId) {
        (self.detection, self.entry)
    }
}

/// One maximal connected subgraph of the detection/entry graph within a
/// single cluster tag. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub cluster: Option<ClusterTag>,
    /// Edges in the order they appeared in the cluster's edge sequence.
    pub edges: Vec<AssociationEdge>,
}

impl Component {
    #[must_use]
    pub fn new(cluster: Option<ClusterTag>, edges: Vec<AssociationEdge>) -> Self {
        Self { cluster, edges }
    }

    /// Distinct detection ids, ascending.
    #[must_use]
    pub fn detections(&self) -> Vec<DetectionId> {
        self.edges
            .iter()
            .map(|e| e.detection)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct catalog entry ids, ascending.
    #[must_use]
    pub fn entries(&self) -> Vec<EntryId> {
        self.edges
            .iter()
            .map(|e| e.entry)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// A single-edge component is already a 1:1 candidate.
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.edges.len() == 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// =============================================================================
// RESOLUTION OUTPUT
// =============================================================================

/// An ordered sequence of accepted (detection, entry) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pairing(pub Vec<(DetectionId, EntryId)>);

impl Pairing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pairs(&self) -> &[(DetectionId, EntryId)] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the pair is part of this pairing.
    #[must_use]
    pub fn contains(&self, detection: DetectionId, entry: EntryId) -> bool {
        self.0.contains(&(detection, entry))
    }
}

/// Why a component was left unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Refusal {
    /// Detection and entry counts differ; only balanced groups are paired.
    Unbalanced { detections: usize, entries: usize },
    /// The best candidate of this detection is not decisively closer than the runner-up.
    NotIsolated {
        detection: DetectionId,
        isolation: f64,
    },
    /// The detection's nearest entry prefers another detection.
    NotMutual {
        detection: DetectionId,
        entry: EntryId,
    },
    /// The chosen pair has no association edge; a catalog entry is only
    /// ever matched along an edge.
    NotLinked {
        detection: DetectionId,
        entry: EntryId,
    },
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::Unbalanced {
                detections,
                entries,
            } => write!(f, "unbalanced group ({} detections, {} entries)", detections, entries),
            Refusal::NotIsolated {
                detection,
                isolation,
            } => write!(f, "{} not isolated (isolation {:.4})", detection, isolation),
            Refusal::NotMutual { detection, entry } => {
                write!(f, "{} and {} are not mutual nearest neighbours", detection, entry)
            }
            Refusal::NotLinked { detection, entry } => {
                write!(f, "{} and {} are paired but not linked by an edge", detection, entry)
            }
        }
    }
}

/// Outcome of resolving one component: a full pairing or an explicit refusal.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Pairing),
    Unresolved(Refusal),
}

impl Resolution {
    /// `true` when a confident one-to-one pairing was found.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    /// The accepted pairs; empty when unresolved.
    #[must_use]
    pub fn pairs(&self) -> &[(DetectionId, EntryId)] {
        match self {
            Resolution::Resolved(pairing) => pairing.pairs(),
            Resolution::Unresolved(_) => &[],
        }
    }

    #[must_use]
    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Resolution::Resolved(_) => None,
            Resolution::Unresolved(refusal) => Some(refusal),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in skymatch.
///
/// - An unresolved group is NOT an error; see [`Resolution::Unresolved`]
/// - Precondition violations fail fast and are never retried internally
/// - The core never panics; all errors are recoverable by the caller
#[derive(Debug, Error)]
pub enum SkymatchError {
    /// Group discovery was handed an empty edge sequence.
    #[error("Empty cluster: group discovery needs at least one edge")]
    EmptyCluster,

    /// A component cannot be resolved because its input is malformed.
    #[error("Malformed component: {0}")]
    MalformedComponent(String),

    /// Edges handed to one group discovery call carry different cluster tags.
    #[error("Mixed cluster tags: expected {expected:?}, found {found:?}")]
    MixedClusterTags {
        expected: Option<ClusterTag>,
        found: Option<ClusterTag>,
    },

    /// A detection or entry is linked under two cluster tags of the same image.
    #[error("Cross-cluster overlap: {member} appears in both {first:?} and {second:?}")]
    CrossClusterOverlap {
        member: String,
        first: Option<ClusterTag>,
        second: Option<ClusterTag>,
    },

    /// A record has non-finite values or non-positive errors.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The requested detection was not found in the store.
    #[error("Detection not found: {0}")]
    DetectionNotFound(DetectionId),

    /// The requested catalog entry was not found in the store.
    #[error("Catalog entry not found: {0}")]
    EntryNotFound(EntryId),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
