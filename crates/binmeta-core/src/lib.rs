//! # binmeta-core
//!
//! The deterministic metadata engine for binmeta - THE LOGIC.
//!
//! binmeta keeps an append-only log of observation events about
//! content-addressed binary artifacts: where each artifact came from, how
//! artifacts derive from one another, and what plugins have said about them.
//! This crate turns that log into two read views:
//!
//! - **Entity summary** ([`summary`]): one canonical, deduplicated summary
//!   of everything known about one entity.
//! - **Provenance neighborhood** ([`traversal`]): a sorted, deduplicated
//!   edge list of an entity's ancestors, descendants and cousins.
//!
//! Both read through the [`QueryExecutor`] contract and share the
//! representative-event rules in [`selection`].
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Has NO async, NO network dependencies (pure Rust)
//! - Uses `BTreeMap`/`BTreeSet` only, so every ordering is reproducible
//! - Never mutates events; entities and links are recomputed on every read
//! - Treats missing entities and truncated groups as data, not errors

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod formats;
pub mod ingestor;
pub mod primitives;
pub mod query;
pub mod selection;
pub mod session;
pub mod storage;
pub mod store;
pub mod summary;
pub mod traversal;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Action, Author, Derivation, EntityDescriptor, EntityHash, Event, EventId, FeatureType,
    FeatureValue, InstanceKey, MetaError, ParentRef, SecurityLabel, StreamDescriptor, Submission,
    Timestamp,
};

// =============================================================================
// RE-EXPORTS: Engines
// =============================================================================

pub use cache::{CacheKey, CacheStats, CacheStore, MemoryCache};
pub use collaborators::{
    Annotations, EntityTag, FeatureTag, PluginConfig, PluginRegistry, StaticPluginRegistry,
    TagStore,
};
pub use config::{CacheConfig, CoreConfig, SecurityConfig};
pub use ingestor::{Ingestor, RawEvent};
pub use query::{
    Deadline, Field, Filter, Predicate, QueryExecutor, QueryRequest, QueryResponse, ReadContext,
    Visibility,
};
pub use selection::SortOrder;
pub use session::{FullRead, ReadOptions, Requester, Session, StorageBackend};
pub use storage::RedbEventLog;
pub use store::{EventLog, MemoryStore};
pub use summary::{Diagnostic, Reducer, Section, Severity, Summary, SummaryOptions};
pub use traversal::{Link, NearbyOptions, NeighborhoodResult, Traversal};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PersistenceHeader, checksum, events_from_bytes, events_to_bytes};
