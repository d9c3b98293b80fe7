//! # Storage
//!
//! Persistent [`CatalogStore`](crate::CatalogStore) backends.

mod redb_catalog;

pub use redb_catalog::RedbCatalog;
