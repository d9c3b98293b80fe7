//! # Formats
//!
//! On-disk representations of a catalog.

mod persistence;

pub use persistence::{MAX_SNAPSHOT_SIZE, SnapshotHeader, store_from_bytes, store_to_bytes};
