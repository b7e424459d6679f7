//! # Session Module
//!
//! The outer "read full metadata" surface: one event log, its collaborators,
//! the collaborator cache and the core configuration behind one handle.
//!
//! ## Storage Backends
//!
//! Session supports two storage backends:
//! - `InMemory`: Uses [`MemoryStore`] (fast, volatile unless exported)
//! - `Persistent`: Uses [`RedbEventLog`] for disk-backed ACID storage
//!
//! Both are query executors; the reducer and the traversal engine never
//! know which one they are reading from.

use crate::cache::{CacheKey, CacheStats, CacheStore, MemoryCache};
use crate::collaborators::{
    Annotations, EntityTag, FeatureTag, PluginConfig, PluginRegistry, StaticPluginRegistry,
    TagStore,
};
use crate::config::CoreConfig;
use crate::formats::{events_from_bytes, events_to_bytes};
use crate::ingestor::Ingestor;
use crate::primitives::{EXPORT_PAGE_SIZE, MAX_BATCH_LENGTH};
use crate::query::{Deadline, Filter, QueryExecutor, QueryRequest, ReadContext, Visibility};
use crate::storage::RedbEventLog;
use crate::store::{EventLog, MemoryStore};
use crate::summary::{Reducer, Summary, SummaryOptions};
use crate::traversal::{NearbyOptions, NeighborhoodResult, Traversal};
use crate::{EntityHash, Event, MetaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// =============================================================================
// REQUESTER
// =============================================================================

/// Who is reading, as far as the core is concerned.
///
/// The fingerprint partitions cached collaborator results; the context
/// carries the visibility predicate and an optional deadline.
#[derive(Debug, Clone)]
pub struct Requester {
    pub fingerprint: String,
    pub context: ReadContext,
}

impl Requester {
    #[must_use]
    pub fn new(fingerprint: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            context: ReadContext::new(visibility),
        }
    }

    /// Unrestricted reader, used by local tooling.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("anonymous", Visibility::unrestricted())
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.context = self.context.with_deadline(deadline);
        self
    }
}

/// What [`Session::read_full`] computes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub summary: SummaryOptions,
    /// Expand the neighborhood too.
    pub nearby: Option<NearbyOptions>,
}

/// Summary plus, on request, the provenance neighborhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullRead {
    pub hash: EntityHash,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<NeighborhoodResult>,
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory event log (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed event log using redb (ACID, persistent).
    Persistent(RedbEventLog),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    fn executor(&self) -> &dyn QueryExecutor {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(redb) => redb,
        }
    }

    fn log(&self) -> &dyn EventLog {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(redb) => redb,
        }
    }

    fn log_mut(&mut self) -> &mut dyn EventLog {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(redb) => redb,
        }
    }
}

// =============================================================================
// CACHED COLLABORATORS
// =============================================================================

/// Feature tags cached per requester. Entity tags are read through.
struct CachedAnnotations<'a> {
    inner: &'a dyn Annotations,
    cache: &'a MemoryCache<Vec<FeatureTag>>,
    requester: &'a str,
}

impl Annotations for CachedAnnotations<'_> {
    fn entity_tags(&self, hash: &EntityHash) -> Result<Vec<EntityTag>, MetaError> {
        self.inner.entity_tags(hash)
    }

    fn feature_tags(&self, name: &str, value: &str) -> Result<Vec<FeatureTag>, MetaError> {
        let key = CacheKey::new("feature_tags", self.requester, &[name, value]);
        self.cache
            .get_or_try_insert(key, || self.inner.feature_tags(name, value))
    }
}

struct CachedPlugins<'a> {
    inner: &'a dyn PluginRegistry,
    cache: &'a MemoryCache<Vec<PluginConfig>>,
    requester: &'a str,
}

impl PluginRegistry for CachedPlugins<'_> {
    fn latest_configs(&self) -> Result<Vec<PluginConfig>, MetaError> {
        let key = CacheKey::new("plugin_configs", self.requester, &[]);
        self.cache
            .get_or_try_insert(key, || self.inner.latest_configs())
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// An event log with everything needed to read it back.
///
/// Note: Session does NOT implement Clone. The redb handle cannot be
/// duplicated safely.
pub struct Session {
    backend: StorageBackend,
    annotations: Box<dyn Annotations + Send + Sync>,
    plugins: Box<dyn PluginRegistry + Send + Sync>,
    tag_cache: MemoryCache<Vec<FeatureTag>>,
    plugin_cache: MemoryCache<Vec<PluginConfig>>,
    config: CoreConfig,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::with_backend(StorageBackend::default())
    }
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
        Self::with_backend(StorageBackend::InMemory(store))
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, MetaError> {
        Ok(Self::with_backend(StorageBackend::Persistent(
            RedbEventLog::open(path)?,
        )))
    }

    fn with_backend(backend: StorageBackend) -> Self {
        let config = CoreConfig::default();
        Self {
            backend,
            annotations: Box::new(TagStore::new()),
            plugins: Box::new(StaticPluginRegistry::default()),
            tag_cache: MemoryCache::from_config(&config.cache),
            plugin_cache: MemoryCache::from_config(&config.cache),
            config,
        }
    }

    /// Replace the configuration. Caches are rebuilt with the new sizing.
    pub fn with_config(mut self, config: CoreConfig) -> Result<Self, MetaError> {
        config.validate()?;
        self.tag_cache = MemoryCache::from_config(&config.cache);
        self.plugin_cache = MemoryCache::from_config(&config.cache);
        self.config = config;
        Ok(self)
    }

    #[must_use]
    pub fn with_annotations(mut self, annotations: Box<dyn Annotations + Send + Sync>) -> Self {
        self.annotations = annotations;
        self.tag_cache.clear();
        self
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: Box<dyn PluginRegistry + Send + Sync>) -> Self {
        self.plugins = plugins;
        self.plugin_cache.clear();
        self
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Normalize and append one event. Returns `false` for a duplicate.
    pub fn ingest(&mut self, event: Event) -> Result<bool, MetaError> {
        Ingestor::ingest(self.backend.log_mut(), event, &self.config.security)
    }

    /// Normalize and append a batch; returns how many events were new.
    pub fn ingest_batch(&mut self, events: Vec<Event>) -> Result<usize, MetaError> {
        Ingestor::ingest_batch(self.backend.log_mut(), events, &self.config.security)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Reduce the history of `hash` into one summary.
    pub fn summarize(
        &self,
        requester: &Requester,
        hash: &EntityHash,
        options: &SummaryOptions,
    ) -> Result<Summary, MetaError> {
        let annotations = CachedAnnotations {
            inner: self.annotations.as_ref(),
            cache: &self.tag_cache,
            requester: &requester.fingerprint,
        };
        let plugins = CachedPlugins {
            inner: self.plugins.as_ref(),
            cache: &self.plugin_cache,
            requester: &requester.fingerprint,
        };
        Reducer::new(self.backend.executor(), &annotations, &plugins, &self.config)
            .summarize(&requester.context, hash, options)
    }

    /// The provenance neighborhood of `hash`.
    pub fn nearby(
        &self,
        requester: &Requester,
        hash: &EntityHash,
        options: &NearbyOptions,
    ) -> Result<NeighborhoodResult, MetaError> {
        Traversal::new(self.backend.executor()).nearby(&requester.context, hash, options)
    }

    /// Summary first, then the neighborhood if asked for.
    pub fn read_full(
        &self,
        requester: &Requester,
        hash: &EntityHash,
        options: &ReadOptions,
    ) -> Result<FullRead, MetaError> {
        let summary = self.summarize(requester, hash, &options.summary)?;
        let neighborhood = options
            .nearby
            .as_ref()
            .map(|nearby| self.nearby(requester, hash, nearby))
            .transpose()?;
        Ok(FullRead {
            hash: hash.clone(),
            summary,
            neighborhood,
        })
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn event_count(&self) -> Result<usize, MetaError> {
        self.backend.log().event_count()
    }

    pub fn entity_count(&self) -> Result<usize, MetaError> {
        self.backend.log().entity_count()
    }

    /// Combined hit/miss counters of the collaborator caches.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let tags = self.tag_cache.stats();
        let plugins = self.plugin_cache.stats();
        CacheStats {
            hits: tags.hits + plugins.hits,
            misses: tags.misses + plugins.misses,
            evictions: tags.evictions + plugins.evictions,
        }
    }

    /// Drop every cached collaborator result.
    pub fn clear_caches(&self) {
        self.tag_cache.clear();
        self.plugin_cache.clear();
    }

    // =========================================================================
    // EXPORT / IMPORT
    // =========================================================================

    /// Every event in the log, in event id order, read through the
    /// executor's scroll.
    pub fn export_events(&self) -> Result<Vec<Event>, MetaError> {
        let executor = self.backend.executor();
        let request = QueryRequest::new(Filter::new());
        let mut events = Vec::new();
        let mut cursor = None;
        loop {
            let page = executor.scroll(&request, cursor.as_ref(), EXPORT_PAGE_SIZE)?;
            events.extend(page.hits);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(events)
    }

    /// The whole log in the portable persistence format.
    pub fn export_bytes(&self) -> Result<Vec<u8>, MetaError> {
        events_to_bytes(&self.export_events()?)
    }

    /// Append events in batches. Returns how many were new.
    pub fn import_events(&mut self, events: Vec<Event>) -> Result<usize, MetaError> {
        let mut added = 0;
        let mut remaining = events.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<Event> = remaining.by_ref().take(MAX_BATCH_LENGTH).collect();
            added += self.ingest_batch(chunk)?;
        }
        Ok(added)
    }

    /// Import a file produced by [`Self::export_bytes`].
    pub fn import_bytes(&mut self, bytes: &[u8]) -> Result<usize, MetaError> {
        self.import_events(events_from_bytes(bytes)?)
    }
}

// =============================================================================
// TESTS
// =============================================================================
