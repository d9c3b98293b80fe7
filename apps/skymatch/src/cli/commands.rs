//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use skymatch_core::{
    CatalogRecords, CatalogStore, EntryId, ImageId, ImageReport, MatchConfig, MemoryStore,
    Pipeline, Session, SkymatchError, store_from_bytes, store_to_bytes,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), SkymatchError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| SkymatchError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(SkymatchError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, SkymatchError> {
    let canonical = path.canonicalize().map_err(|e| {
        SkymatchError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(SkymatchError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), SkymatchError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| SkymatchError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// BACKEND & CONFIGURATION
// =============================================================================

/// Where the catalog lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Snapshot file holding a `MemoryStore`.
    File,
    /// redb database.
    Redb,
}

impl Backend {
    pub fn parse(name: &str) -> Result<Self, SkymatchError> {
        match name {
            "file" => Ok(Backend::File),
            "redb" => Ok(Backend::Redb),
            other => Err(SkymatchError::InvalidConfig(format!(
                "Unknown backend: {}. Use: redb, file",
                other
            ))),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Backend::File => "file",
            Backend::Redb => "redb",
        }
    }
}

/// Load the matching configuration, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<MatchConfig, SkymatchError> {
    match path {
        Some(path) => {
            tracing::debug!("Loading configuration from {:?}", path);
            MatchConfig::load(path)
        }
        None => Ok(MatchConfig::default()),
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(db_path: &Path, backend: Backend, force: bool) -> Result<(), SkymatchError> {
    if db_path.exists() {
        if !force {
            return Err(SkymatchError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| SkymatchError::IoError(format!("Remove db: {}", e)))?;
    }

    match backend {
        Backend::Redb => {
            let _session = Session::with_redb(db_path)?;
            println!("Initialized new redb database at {:?}", db_path);
        }
        Backend::File => {
            save_session(&Session::new(), db_path)?;
            println!("Initialized new file database at {:?}", db_path);
        }
    }

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Ingest a JSON batch.
pub fn cmd_ingest(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    file: &Path,
) -> Result<(), SkymatchError> {
    tracing::info!("Ingesting from {:?}", file);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INGEST_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| SkymatchError::IoError(format!("Read file: {}", e)))?;
    let records: CatalogRecords = serde_json::from_slice(&contents)
        .map_err(|e| SkymatchError::DeserializationError(format!("Parse batch: {}", e)))?;

    let mut session = load_or_create_session(db_path, backend)?;
    let summary = session.ingest(&records)?;
    save_session(&session, db_path)?;

    if json_mode {
        return print_json(&summary);
    }

    let stats = session.stats()?;
    println!(
        "Ingested {} detections, {} entries, {} edges",
        summary.detections, summary.entries, summary.edges
    );
    println!(
        "Catalog now has {} entries, {} edges",
        stats.entries, stats.edges
    );
    Ok(())
}

// =============================================================================
// RESOLVE COMMAND
// =============================================================================

fn print_report(report: &ImageReport) {
    println!(
        "{}: {} cluster(s), {} component(s), {} resolved ({} trivial), {} refused, {} skipped",
        report.image,
        report.clusters,
        report.components,
        report.resolved,
        report.trivial,
        report.refused,
        report.skipped_clusters
    );
    for refusal in &report.refusals {
        println!("  refused: {}", refusal);
    }
    if report.commit.new_entries > 0 {
        println!("  new entries: {}", report.commit.new_entries);
    }
}

/// Resolve one image, or every image in ascending order.
pub fn cmd_resolve(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    config: &MatchConfig,
    image: Option<u64>,
) -> Result<(), SkymatchError> {
    let pipeline = Pipeline::from_config(config)?;
    let mut session = load_or_create_session(db_path, backend)?;

    match image {
        Some(id) => {
            let report = session.resolve_image(&pipeline, ImageId(id))?;
            save_session(&session, db_path)?;
            if json_mode {
                return print_json(&report);
            }
            print_report(&report);
        }
        None => {
            let outcomes = session.resolve_all(&pipeline)?;
            save_session(&session, db_path)?;
            if json_mode {
                let output = outcomes
                    .iter()
                    .map(|(image, outcome)| match outcome {
                        Ok(report) => serde_json::to_value(report)
                            .map_err(|e| SkymatchError::SerializationError(e.to_string())),
                        Err(e) => Ok(serde_json::json!({
                            "image": image,
                            "error": e.to_string(),
                        })),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return print_json(&output);
            }
            if outcomes.is_empty() {
                println!("No images with edges");
            }
            for (image, outcome) in &outcomes {
                match outcome {
                    Ok(report) => print_report(report),
                    Err(e) => println!("{}: skipped ({})", image, e),
                }
            }
        }
    }

    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show catalog status.
pub fn cmd_status(db_path: &Path, backend: Backend, json_mode: bool) -> Result<(), SkymatchError> {
    let session = load_or_create_session(db_path, backend)?;
    let stats = session.stats()?;
    let images = session.images()?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "backend": backend.name(),
            "detections": stats.detections,
            "entries": stats.entries,
            "edges": stats.edges,
            "edges_by_kind": stats.edges_by_kind,
            "images": images.len(),
        });
        return print_json(&output);
    }

    println!("skymatch Catalog Status");
    println!("=======================");
    println!("Database: {:?}", db_path);
    println!("Backend:  {}", backend.name());
    println!();
    println!("Detections: {}", stats.detections);
    println!("Entries:    {}", stats.entries);
    println!("Edges:      {}", stats.edges);
    for (kind, count) in &stats.edges_by_kind {
        println!("  {:<13} {}", kind, count);
    }
    println!("Images:     {}", images.len());

    Ok(())
}

// =============================================================================
// ENTRY COMMAND
// =============================================================================

/// Show one catalog entry.
pub fn cmd_entry(
    db_path: &Path,
    backend: Backend,
    json_mode: bool,
    id: u64,
) -> Result<(), SkymatchError> {
    let session = load_or_create_session(db_path, backend)?;
    let entry = session
        .entry(EntryId(id))?
        .ok_or(SkymatchError::EntryNotFound(EntryId(id)))?;

    if json_mode {
        return print_json(&entry);
    }

    println!("{}", entry.id);
    println!("  ra:         {} ± {}", entry.ra.value, entry.ra.error);
    println!("  decl:       {} ± {}", entry.decl.value, entry.decl.error);
    println!("  datapoints: {}", entry.datapoints);
    match entry.group_head {
        Some(tag) => println!("  cluster:    {}", tag),
        None => println!("  cluster:    -"),
    }
    for (band, flux) in &entry.fluxes {
        println!(
            "  flux[{} {:?}]: {} ± {}",
            band.frequency, band.stokes, flux.value, flux.error
        );
    }

    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// Show the effective matching configuration.
pub fn cmd_config(config: &MatchConfig, json_mode: bool) -> Result<(), SkymatchError> {
    config.validate()?;

    if json_mode {
        let output = serde_json::json!({
            "metric": config.metric.name(),
            "isolation_threshold": config.effective_isolation_threshold(),
            "refusal": config.refusal.name(),
            "parallel": config.parallel,
        });
        return print_json(&output);
    }

    println!("metric              = {}", config.metric);
    println!(
        "isolation_threshold = {}{}",
        config.effective_isolation_threshold(),
        if config.isolation_threshold.is_none() {
            " (metric default)"
        } else {
            ""
        }
    );
    println!("refusal             = {}", config.refusal.name());
    println!("parallel            = {}", config.parallel);
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Load or create a session from a database path with the given backend.
pub fn load_or_create_session(db_path: &Path, backend: Backend) -> Result<Session, SkymatchError> {
    match backend {
        Backend::Redb => Session::with_redb(db_path),
        Backend::File => {
            if !db_path.exists() {
                return Ok(Session::new());
            }
            let data = std::fs::read(db_path)
                .map_err(|e| SkymatchError::IoError(format!("Read db: {}", e)))?;

            // Try the binary snapshot first
            if let Ok(store) = store_from_bytes(&data) {
                return Ok(Session::with_store(store));
            }

            // Then a JSON record set
            match serde_json::from_slice::<CatalogRecords>(&data) {
                Ok(records) => Ok(Session::with_store(MemoryStore::try_from(records)?)),
                Err(_) => Err(SkymatchError::DeserializationError(
                    "Could not parse database file".to_string(),
                )),
            }
        }
    }
}

/// Save a session to a database path.
pub fn save_session(session: &Session, db_path: &Path) -> Result<(), SkymatchError> {
    match session.memory_store() {
        // Redb backend - already persisted, nothing to do
        None => Ok(()),
        Some(store) => {
            let data = store_to_bytes(store)?;
            std::fs::write(db_path, &data)
                .map_err(|e| SkymatchError::IoError(format!("Write db: {}", e)))
        }
    }
}
