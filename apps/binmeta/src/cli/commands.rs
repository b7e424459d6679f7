//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api::{self, NearbyRequest, SummaryRequest};
use crate::config::ServerConfig;
use binmeta_core::{
    CoreConfig, EntityHash, Event, MetaError, RawEvent, Requester, Session, Summary, checksum,
    primitives::MAX_FIELD_LENGTH,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), MetaError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| MetaError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(MetaError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path: symlinks and ".." resolved, must be a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, MetaError> {
    let canonical = path.canonicalize().map_err(|e| {
        MetaError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(MetaError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, MetaError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        MetaError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(MetaError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| MetaError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a validated input file.
fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, MetaError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| MetaError::IoError(format!("Read file: {}", e)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), MetaError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MetaError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// STORE
// =============================================================================

/// Where the CLI keeps its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// redb database, written in place.
    Redb,
    /// Portable event-log file, loaded into memory and rewritten on save.
    File,
}

/// A database path plus how to open it.
#[derive(Debug, Clone)]
pub struct Store {
    pub path: PathBuf,
    pub backend: Backend,
    pub core: CoreConfig,
}

impl Store {
    pub fn new(path: PathBuf, backend: &str, core: CoreConfig) -> Result<Self, MetaError> {
        let backend = match backend {
            "redb" => Backend::Redb,
            "file" => Backend::File,
            other => {
                return Err(MetaError::ConfigError(format!(
                    "Unknown backend: {}. Use: redb, file",
                    other
                )));
            }
        };
        Ok(Self {
            path,
            backend,
            core,
        })
    }

    /// Open the session, creating an empty log if none exists.
    pub fn open(&self) -> Result<Session, MetaError> {
        let session = match self.backend {
            Backend::Redb => Session::with_redb(&self.path)?,
            Backend::File => Session::new(),
        }
        .with_config(self.core.clone())?;

        match self.backend {
            Backend::File if self.path.exists() => {
                let mut session = session;
                let data = read_input(&self.path, MAX_IMPORT_FILE_SIZE)?;
                session.import_bytes(&data)?;
                Ok(session)
            }
            _ => Ok(session),
        }
    }

    /// Persist a file-backed session. redb writes are already durable.
    pub fn save(&self, session: &Session) -> Result<(), MetaError> {
        if session.is_persistent() {
            return Ok(());
        }
        let data = session.export_bytes()?;
        std::fs::write(&self.path, &data)
            .map_err(|e| MetaError::IoError(format!("Write db: {}", e)))
    }

    fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Redb => "redb",
            Backend::File => "file",
        }
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(store: &Store, server: &ServerConfig) -> Result<(), MetaError> {
    let session = store.open()?;

    println!("binmeta server starting...");
    println!();
    println!("Configuration:");
    println!("  Address:  {}", server.addr());
    println!("  Backend:  {}", store.backend_name());
    println!("  Database: {:?}", store.path);
    if let Some(ms) = server.request_timeout_ms {
        println!("  Timeout:  {} ms", ms);
    }
    println!();
    println!("Endpoints:");
    println!("  POST /events                  - Ingest events");
    println!("  POST /entities/{{hash}}/summary - Entity summary");
    println!("  POST /entities/{{hash}}/nearby  - Provenance neighborhood");
    println!("  POST /entities/{{hash}}         - Summary + neighborhood");
    println!("  GET  /status                  - Event log status");
    println!("  POST /export                  - Export event log");
    println!("  GET  /health                  - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(server, session).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show event log status.
pub fn cmd_status(store: &Store, json_mode: bool) -> Result<(), MetaError> {
    let session = store.open()?;
    let events = session.event_count()?;
    let entities = session.entity_count()?;

    if json_mode {
        return print_json(&serde_json::json!({
            "database": store.path.to_string_lossy(),
            "backend": store.backend_name(),
            "event_count": events,
            "entity_count": entities,
        }));
    }

    println!("binmeta Event Log Status");
    println!("========================");
    println!("Database: {:?}", store.path);
    println!("Backend:  {}", store.backend_name());
    println!();
    println!("Events:   {}", events);
    println!("Entities: {}", entities);

    Ok(())
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Parse wire events from `contents`. The first malformed event fails the
/// whole file, naming its position.
pub fn parse_events(contents: &[u8], format: &str) -> Result<Vec<Event>, MetaError> {
    let raw: Vec<RawEvent> = match format {
        "json" => serde_json::from_slice(contents)
            .map_err(|e| MetaError::InvalidEvent(format!("Invalid JSON: {}", e)))?,
        "jsonl" => String::from_utf8_lossy(contents)
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| MetaError::InvalidEvent(format!("line {}: {}", n + 1, e)))
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(MetaError::SerializationError(format!(
                "Unknown format: {}. Use: json, jsonl",
                format
            )));
        }
    };

    raw.into_iter()
        .enumerate()
        .map(|(i, event)| {
            Event::try_from(event)
                .map_err(|e| MetaError::InvalidEvent(format!("event {}: {}", i, e)))
        })
        .collect()
}

/// Ingest events from a file.
pub fn cmd_ingest(store: &Store, file: &Path, format: &str) -> Result<(), MetaError> {
    tracing::info!("Ingesting from {:?} (format: {})", file, format);

    let contents = read_input(file, MAX_INGEST_FILE_SIZE)?;
    let events = parse_events(&contents, format)?;
    let received = events.len();

    let mut session = store.open()?;
    let added = session.import_events(events)?;
    store.save(&session)?;

    println!("Ingested {} events ({} new)", received, added);
    println!(
        "Log now has {} events over {} entities",
        session.event_count()?,
        session.entity_count()?
    );

    Ok(())
}

// =============================================================================
// SUMMARY COMMAND
// =============================================================================

fn parse_hash(hash: &str) -> Result<EntityHash, MetaError> {
    let hash = EntityHash::new(hash);
    if hash.is_empty() || hash.as_str().len() > MAX_FIELD_LENGTH {
        return Err(MetaError::InvalidHash);
    }
    Ok(hash)
}

/// Summarize one entity.
pub fn cmd_summary(
    store: &Store,
    json_mode: bool,
    hash: &str,
    sections: Option<&str>,
    author: Option<String>,
) -> Result<(), MetaError> {
    let hash = parse_hash(hash)?;
    let options = SummaryRequest {
        sections: sections.map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        }),
        author,
    }
    .to_options()?;

    let session = store.open()?;
    let summary = session.summarize(&Requester::anonymous(), &hash, &options)?;

    if json_mode {
        return print_json(&summary);
    }
    print_summary(&hash, &summary);
    Ok(())
}

fn print_summary(hash: &EntityHash, summary: &Summary) {
    println!("Entity {}", hash);
    println!("{}", "=".repeat(7 + hash.as_str().len()));

    if let Some(docs) = &summary.documents {
        let newest = docs.newest.map(|t| t.to_string()).unwrap_or_default();
        let marker = if docs.approximate { "+" } else { "" };
        println!("Events:      {}{} (newest {})", docs.count, marker, newest);
    }
    if let Some(security) = &summary.security {
        println!("Security:    {}", security.join(", "));
    }
    if let Some(sources) = &summary.sources {
        println!("Sources:     {}", sources.len());
        for source in sources {
            println!(
                "  {} ({} direct, {} indirect)",
                source.name,
                source.direct.len(),
                source.indirect.len()
            );
        }
    }
    if let Some(parents) = &summary.parents {
        println!("Parents:     {}", parents.len());
        for parent in parents.iter().take(10) {
            println!("  {} ({})", parent.entity.hash, parent.action);
        }
    }
    if let Some(children) = &summary.children {
        println!("Children:    {}", children.len());
        for child in children.iter().take(10) {
            println!("  {} ({})", child.entity.hash, child.action);
        }
    }
    if let Some(instances) = &summary.instances {
        println!("Instances:   {}", instances.len());
    }
    if let Some(features) = &summary.features {
        println!("Features:    {}", features.len());
        for feature in features.iter().take(10) {
            println!("  {} = {}", feature.name, feature.value);
        }
        if features.len() > 10 {
            println!("  ... and {} more", features.len() - 10);
        }
    }
    if let Some(streams) = &summary.datastreams {
        println!("Streams:     {}", streams.len());
    }
    for diagnostic in &summary.diagnostics {
        println!(
            "[{:?}] {}: {}",
            diagnostic.severity, diagnostic.id, diagnostic.message
        );
    }
}

// =============================================================================
// NEARBY COMMAND
// =============================================================================

/// Show the provenance neighborhood of one entity.
pub fn cmd_nearby(
    store: &Store,
    json_mode: bool,
    hash: &str,
    cousins: bool,
    max_cousins: Option<usize>,
    max_distance: Option<usize>,
) -> Result<(), MetaError> {
    let hash = parse_hash(hash)?;
    let options = NearbyRequest {
        include_cousins: cousins,
        max_cousins,
        max_cousin_distance: max_distance,
    }
    .to_options()?;

    let session = store.open()?;
    let result = session.nearby(&Requester::anonymous(), &hash, &options)?;

    if json_mode {
        return print_json(&result);
    }

    println!("Neighborhood of {} ({} links)", result.focus, result.links.len());
    for link in &result.links {
        match &link.parent {
            Some(parent) => println!(
                "  {} -> {} ({}, {})",
                parent, link.child, link.child_node.action, link.child_node.author.name
            ),
            None => println!(
                "  [{}] -> {}",
                link.source.as_deref().unwrap_or("?"),
                link.child
            ),
        }
    }

    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export the event log.
pub fn cmd_export(store: &Store, output: &Path, format: &str) -> Result<(), MetaError> {
    let validated_output = validate_output_path(output)?;
    let session = store.open()?;

    let data = match format {
        "binary" => {
            let data = session.export_bytes()?;
            println!("Checksum: {}", checksum(&data));
            data
        }
        "json" => {
            let raw: Vec<RawEvent> = session.export_events()?.iter().map(RawEvent::from).collect();
            serde_json::to_vec_pretty(&raw)
                .map_err(|e| MetaError::SerializationError(e.to_string()))?
        }
        _ => {
            return Err(MetaError::SerializationError(format!(
                "Unknown format: {}. Use: binary, json",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| MetaError::IoError(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import events from a binary export.
pub fn cmd_import(store: &Store, input: &Path) -> Result<(), MetaError> {
    let data = read_input(input, MAX_IMPORT_FILE_SIZE)?;

    let mut session = store.open()?;
    let added = session.import_bytes(&data)?;
    store.save(&session)?;

    println!(
        "Imported {} new events ({} total)",
        added,
        session.event_count()?
    );

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(store: &Store, force: bool) -> Result<(), MetaError> {
    if store.path.exists() {
        if !force {
            return Err(MetaError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&store.path)
            .map_err(|e| MetaError::IoError(format!("Remove existing db: {}", e)))?;
    }

    let session = store.open()?;
    store.save(&session)?;
    println!(
        "Initialized new {} database at {:?}",
        store.backend_name(),
        store.path
    );

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
