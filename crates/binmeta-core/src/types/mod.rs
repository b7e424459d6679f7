//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the binmeta CORE:
//! - Entity identity (`EntityHash`) and time (`Timestamp`)
//! - Authorship (`Author`, `Action`, `InstanceKey`)
//! - Observation events (`Event`) and their tagged derivation (`Derivation`)
//! - Error types (`MetaError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where they participate in `BTreeMap`/`BTreeSet` keys
//! - Normalize case-insensitive identifiers on construction

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// ENTITY HASH
// =============================================================================

/// Content hash identifying an entity.
///
/// Hashes are case-insensitive: the value is trimmed and lowercased on
/// construction and on deserialization, so every lookup and comparison
/// sees the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityHash(String);

impl EntityHash {
    /// Create a normalized hash.
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_lowercase())
    }

    /// Get the hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the hash is empty after normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EntityHash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for EntityHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<EntityHash> for String {
    fn from(h: EntityHash) -> Self {
        h.0
    }
}

impl fmt::Display for EntityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TIMESTAMP
// =============================================================================

/// Millisecond-precision UTC timestamp.
///
/// Serialized as RFC 3339 with milliseconds and a `Z` suffix,
/// e.g. `2021-01-01T12:00:00.000Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn millis(self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| Self(dt.timestamp_millis()))
            .map_err(|e| MetaError::InvalidEvent(format!("invalid timestamp '{}': {}", s, e)))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// AUTHORSHIP
// =============================================================================

/// The fixed set of actions an author can perform on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Sourced,
    Extracted,
    Mapped,
    Augmented,
    Enriched,
}

impl Action {
    /// All actions in declaration order.
    pub const ALL: [Action; 5] = [
        Action::Sourced,
        Action::Extracted,
        Action::Mapped,
        Action::Augmented,
        Action::Enriched,
    ];

    /// Actions that produce new entities and therefore provenance edges.
    pub const DERIVATION: [Action; 3] = [Action::Sourced, Action::Extracted, Action::Mapped];

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sourced => "sourced",
            Self::Extracted => "extracted",
            Self::Mapped => "mapped",
            Self::Augmented => "augmented",
            Self::Enriched => "enriched",
        }
    }

    /// True for sourced, extracted and mapped.
    #[must_use]
    pub const fn is_derivation(self) -> bool {
        matches!(self, Self::Sourced | Self::Extracted | Self::Mapped)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MetaError::InvalidEvent(format!("unknown action '{}'", s)))
    }
}

/// The producer of an event (a plugin or a loader).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Author {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Author {
    /// Create an author without a version.
    #[must_use]
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            version: None,
        }
    }

    /// Builder-style version setter.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// The contribution of one (author, action) pair to one entity's history.
///
/// Author version is deliberately not part of the key: a newer plugin
/// version supersedes the older one's instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub category: String,
    pub name: String,
    pub action: Action,
}

impl InstanceKey {
    #[must_use]
    pub fn new(author: &Author, action: Action) -> Self {
        Self {
            category: author.category.clone(),
            name: author.name.clone(),
            action,
        }
    }

    /// Entity-qualified string form, used in link identities.
    #[must_use]
    pub fn qualified(&self, entity: &EntityHash) -> String {
        format!("{}.{}", entity, self)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.category, self.name, self.action)
    }
}

// =============================================================================
// EVENT COMPONENTS
// =============================================================================

/// Descriptive fields of the observed entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub hash: EntityHash,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub magic: Option<String>,
}

impl EntityDescriptor {
    /// Descriptor carrying only a hash.
    #[must_use]
    pub fn new(hash: impl Into<EntityHash>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }
}

/// Declared type of a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    String,
    Integer,
    Float,
    Binary,
    Uri,
    Datetime,
    Filepath,
}

/// One named, typed feature observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureValue {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: FeatureType,
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl FeatureValue {
    /// Plain string feature.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: FeatureType::String,
            value: value.into(),
            label: None,
            offset: None,
            size: None,
        }
    }
}

/// A content-addressed data stream attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub hash: EntityHash,
    pub labels: BTreeSet<String>,
    pub size: u64,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
}

/// Reference to the entity an event's entity was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub hash: EntityHash,
    pub author: Author,
    pub action: Action,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub relationship: BTreeMap<String, String>,
}

impl ParentRef {
    /// The parent's own instance key.
    #[must_use]
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(&self.author, self.action)
    }
}

/// Record of the external submission an event traces back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub name: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub references: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// 0 for a direct submission, otherwise the derivation distance.
    #[serde(default)]
    pub depth: u32,
}

impl Submission {
    /// Stable submission key: source name plus sorted references, hashed.
    #[must_use]
    pub fn key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.name.as_bytes());
        hasher.update(&[0]);
        for (k, v) in &self.references {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().as_str()[..32].to_string()
    }

    /// True for depth-0 submissions.
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.depth == 0
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// How an event relates to other entities.
///
/// `Sourced` cannot carry a parent. `Extracted`, `Augmented` and `Enriched`
/// always carry exactly one. `Mapped` may carry one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Derivation {
    Sourced,
    Extracted(ParentRef),
    Mapped(Option<ParentRef>),
    Augmented(ParentRef),
    Enriched(ParentRef),
}

impl Derivation {
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::Sourced => Action::Sourced,
            Self::Extracted(_) => Action::Extracted,
            Self::Mapped(_) => Action::Mapped,
            Self::Augmented(_) => Action::Augmented,
            Self::Enriched(_) => Action::Enriched,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> Option<&ParentRef> {
        match self {
            Self::Sourced | Self::Mapped(None) => None,
            Self::Mapped(Some(p)) | Self::Extracted(p) | Self::Augmented(p) | Self::Enriched(p) => {
                Some(p)
            }
        }
    }
}

/// Content-derived event identifier, used as the final tie-break everywhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Security classification string attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityLabel(pub String);

impl SecurityLabel {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One immutable observation of an entity by one author performing one action.
///
/// Events are stored with postcard, which is not self-describing, so no
/// field here may be skipped during serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: EventId,
    pub entity: EntityDescriptor,
    pub author: Author,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub security: SecurityLabel,
    #[serde(default)]
    pub features: Vec<FeatureValue>,
    /// Opaque producer-defined payload, kept as raw JSON text.
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default)]
    pub source: Option<Submission>,
    pub derivation: Derivation,
}

impl Event {
    /// Create a bare event; other fields are filled in with struct update syntax
    /// or the builder-style setters below.
    #[must_use]
    pub fn new(
        entity: impl Into<EntityHash>,
        author: Author,
        timestamp: Timestamp,
        derivation: Derivation,
    ) -> Self {
        Self {
            id: EventId::default(),
            entity: EntityDescriptor::new(entity),
            author,
            timestamp,
            security: SecurityLabel::default(),
            features: Vec::new(),
            info: None,
            streams: Vec::new(),
            source: None,
            derivation,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Submission) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: Vec<FeatureValue>) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn with_streams(mut self, streams: Vec<StreamDescriptor>) -> Self {
        self.streams = streams;
        self
    }

    #[must_use]
    pub fn with_security(mut self, label: impl Into<String>) -> Self {
        self.security = SecurityLabel::new(label);
        self
    }

    #[must_use]
    pub fn with_size_and_format(mut self, size: u64, file_format: impl Into<String>) -> Self {
        self.entity.size = Some(size);
        self.entity.file_format = Some(file_format.into());
        self
    }

    #[must_use]
    pub fn hash(&self) -> &EntityHash {
        &self.entity.hash
    }

    #[must_use]
    pub const fn action(&self) -> Action {
        self.derivation.action()
    }

    #[must_use]
    pub const fn parent(&self) -> Option<&ParentRef> {
        self.derivation.parent()
    }

    #[must_use]
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(&self.author, self.action())
    }

    /// Submission depth, if the event carries a submission.
    #[must_use]
    pub fn depth(&self) -> Option<u32> {
        self.source.as_ref().map(|s| s.depth)
    }

    /// True when both size and file format are known.
    #[must_use]
    pub const fn has_size_and_format(&self) -> bool {
        self.entity.size.is_some() && self.entity.file_format.is_some()
    }

    /// Known upstream defect: an entity recorded as its own parent.
    #[must_use]
    pub fn is_self_referential(&self) -> bool {
        self.parent().is_some_and(|p| p.hash == self.entity.hash)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the binmeta CORE.
///
/// Only executor-level faults reach callers of the reducer and the
/// traversal engine; missing entities, truncated groups and malformed
/// upstream data become empty results or diagnostics instead.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The event is malformed and cannot be ingested.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The entity hash is empty or oversized.
    #[error("Invalid entity hash")]
    InvalidHash,

    /// The query executor failed or rejected a query.
    #[error("Query executor error: {0}")]
    Executor(String),

    /// A caller-imposed deadline expired between rounds.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author::new("plugin", "unpacker")
    }

    #[test]
    fn entity_hash_is_lowercased() {
        assert_eq!(EntityHash::new("  ABCdef "), EntityHash::new("abcdef"));
        assert_eq!(EntityHash::new("ABC").as_str(), "abc");
    }

    #[test]
    fn timestamp_renders_millis_with_z_suffix() {
        let ts: Timestamp = "2021-01-01T12:00:00Z".parse().expect("parse");
        assert_eq!(ts.to_string(), "2021-01-01T12:00:00.000Z");
    }

    #[test]
    fn timestamp_parses_offsets() {
        let a: Timestamp = "2021-01-01T13:00:00+01:00".parse().expect("parse");
        let b: Timestamp = "2021-01-01T12:00:00.000Z".parse().expect("parse");
        assert_eq!(a, b);
    }

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!("Extracted".parse::<Action>().expect("parse"), Action::Extracted);
        assert!("deleted".parse::<Action>().is_err());
    }

    #[test]
    fn instance_key_excludes_version() {
        let a = InstanceKey::new(&author().with_version("1"), Action::Extracted);
        let b = InstanceKey::new(&author().with_version("2"), Action::Extracted);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "plugin.unpacker.extracted");
    }

    #[test]
    fn submission_key_ignores_reference_insertion_order() {
        let mut refs_a = BTreeMap::new();
        refs_a.insert("b".to_string(), "2".to_string());
        refs_a.insert("a".to_string(), "1".to_string());
        let mut refs_b = BTreeMap::new();
        refs_b.insert("a".to_string(), "1".to_string());
        refs_b.insert("b".to_string(), "2".to_string());

        let sub = |references| Submission {
            name: "s1".into(),
            timestamp: Timestamp(0),
            references,
            settings: BTreeMap::new(),
            depth: 0,
        };
        assert_eq!(sub(refs_a).key(), sub(refs_b).key());
    }

    #[test]
    fn self_referential_parent_detected() {
        let parent = ParentRef {
            hash: EntityHash::new("E1"),
            author: author(),
            action: Action::Sourced,
            timestamp: Timestamp(0),
            relationship: BTreeMap::new(),
        };
        let event = Event::new("e1", author(), Timestamp(1), Derivation::Extracted(parent));
        assert!(event.is_self_referential());
    }

    #[test]
    fn sourced_has_no_parent() {
        let event = Event::new("e1", author(), Timestamp(1), Derivation::Sourced);
        assert!(event.parent().is_none());
        assert_eq!(event.action(), Action::Sourced);
    }
}
