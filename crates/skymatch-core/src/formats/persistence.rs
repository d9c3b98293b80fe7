//! # Snapshot Format
//!
//! Binary serialization for [`MemoryStore`] catalogs.
//!
//! File I/O lives in the app layer; this module only converts between a
//! store and bytes.
//!
//! Format: Header (5 bytes) + postcard-serialized [`CatalogRecords`].
//! - 4 bytes: Magic ("SKYM")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded.

use crate::{CatalogRecords, MemoryStore, SkymatchError, primitives};

/// Maximum accepted snapshot size.
pub const MAX_SNAPSHOT_SIZE: usize = 500 * 1024 * 1024;

const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The snapshot header precedes all catalog data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), SkymatchError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(SkymatchError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(SkymatchError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let [a, b, c, d] = self.magic;
        [a, b, c, d, self.version]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SkymatchError> {
        match bytes {
            [a, b, c, d, version, ..] => Ok(Self {
                magic: [*a, *b, *c, *d],
                version: *version,
            }),
            _ => Err(SkymatchError::DeserializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a store to bytes (header + payload).
pub fn store_to_bytes(store: &MemoryStore) -> Result<Vec<u8>, SkymatchError> {
    let records = CatalogRecords::from(store);
    let payload = postcard::to_stdvec(&records)
        .map_err(|e| SkymatchError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a store from bytes.
///
/// Every record is re-validated on the way in, so a snapshot with a
/// dangling edge or a non-finite measurement is rejected.
pub fn store_from_bytes(bytes: &[u8]) -> Result<MemoryStore, SkymatchError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(SkymatchError::DeserializationError(format!(
            "Snapshot size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }

    let header = SnapshotHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = bytes.get(HEADER_LEN..).unwrap_or_default();
    let records: CatalogRecords = postcard::from_bytes(payload).map_err(|e| {
        SkymatchError::DeserializationError(format!("Failed to decode catalog data: {}", e))
    })?;

    MemoryStore::try_from(records)
}

// =============================================================================
// TESTS
// =============================================================================
