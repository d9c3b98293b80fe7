//! # Matching Primitives
//!
//! Compiled-in constants for the skymatch core.
//!
//! 1. **Isolation thresholds**: how decisively the best candidate must beat the runner-up.
//! 2. **Distance floor**: keeps identical coordinates from producing a zero distance.
//! 3. **Snapshot format**: header bytes for the file-backed catalog store.

/// Default isolation threshold for the positional metric.
///
/// A detection's nearest entry is only accepted when
/// `nearest / second_nearest < DEFAULT_ISOLATION_THRESHOLD`,
/// i.e. the best distance is at most 2% of the runner-up.
pub const DEFAULT_ISOLATION_THRESHOLD: f64 = 0.02;

/// Default isolation threshold for the positional+flux metric.
///
/// Flux is a noisier, epoch-variable discriminant, so the flux variant
/// demands a tighter ratio.
pub const DEFAULT_FLUX_ISOLATION_THRESHOLD: f64 = 0.01;

/// Additive floor applied to every distance.
pub const DISTANCE_FLOOR: f64 = 1e-12;

/// Magic bytes for the skymatch snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"SKYM";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of records (detections + entries + edges) in one ingest batch.
///
/// Batches larger than this are rejected before any record is stored.
pub const MAX_BATCH_RECORDS: usize = 1_000_000;
