//! # Ingestor Module
//!
//! Event validation and normalization for binmeta CORE.
//!
//! - Validate events before they reach an event log
//! - Reject malformed input
//! - Default missing security labels to the baseline
//! - Assign content-derived ids
//!
//! Self-referential events (an entity recorded as its own parent) are a
//! known upstream defect. They are accepted here and ignored by every
//! derivation-aware reduction.

use crate::config::SecurityConfig;
use crate::primitives::{MAX_BATCH_LENGTH, MAX_FIELD_LENGTH, MAX_INFO_LENGTH, MAX_VALUE_LENGTH};
use crate::store::EventLog;
use crate::{
    Action, Author, Derivation, EntityDescriptor, Event, EventId, FeatureValue, MetaError,
    ParentRef, SecurityLabel, StreamDescriptor, Submission, Timestamp,
};
use serde::{Deserialize, Serialize};

/// The Ingestor handles event validation and normalization.
pub struct Ingestor;

impl Ingestor {
    /// Validate an event.
    ///
    /// An event is valid if:
    /// - The entity hash is non-empty and within length limits
    /// - Author category and name are non-empty and within length limits
    /// - Feature values and the info payload are within length limits
    pub fn validate(event: &Event) -> Result<(), MetaError> {
        let hash = event.hash().as_str();
        if hash.is_empty() || hash.len() > MAX_FIELD_LENGTH {
            return Err(MetaError::InvalidHash);
        }
        if let Some(parent) = event.parent() {
            if parent.hash.is_empty() || parent.hash.as_str().len() > MAX_FIELD_LENGTH {
                return Err(MetaError::InvalidHash);
            }
        }

        check_field("author category", &event.author.category)?;
        check_field("author name", &event.author.name)?;

        for feature in &event.features {
            check_field("feature name", &feature.name)?;
            if feature.value.len() > MAX_VALUE_LENGTH {
                return Err(MetaError::InvalidEvent(format!(
                    "feature '{}' value exceeds {} bytes",
                    feature.name, MAX_VALUE_LENGTH
                )));
            }
        }
        for stream in &event.streams {
            if stream.hash.is_empty() {
                return Err(MetaError::InvalidHash);
            }
        }
        if let Some(source) = &event.source {
            check_field("source name", &source.name)?;
        }
        if event.info.as_ref().is_some_and(|i| i.len() > MAX_INFO_LENGTH) {
            return Err(MetaError::InvalidEvent(format!(
                "info payload exceeds {} bytes",
                MAX_INFO_LENGTH
            )));
        }

        Ok(())
    }

    /// Validate and normalize an event.
    ///
    /// Hashes are already lowercase by construction; alternate digests are
    /// lowercased here. A blank security label becomes the baseline label,
    /// and an event without an id gets one derived from its content.
    pub fn normalize(mut event: Event, security: &SecurityConfig) -> Result<Event, MetaError> {
        Self::validate(&event)?;

        event.entity.sha1 = event.entity.sha1.map(|s| s.trim().to_lowercase());
        event.entity.md5 = event.entity.md5.map(|s| s.trim().to_lowercase());
        if event.security.as_str().trim().is_empty() {
            event.security = security.baseline();
        }
        if event.is_self_referential() {
            tracing::debug!(entity = %event.hash(), "self-referential event accepted");
        }
        if event.id.as_str().is_empty() {
            event.id = Self::content_id(&event)?;
        }
        Ok(event)
    }

    /// blake3 over the postcard encoding of the event with an empty id.
    pub fn content_id(event: &Event) -> Result<EventId, MetaError> {
        let mut copy = event.clone();
        copy.id = EventId::default();
        let bytes = postcard::to_allocvec(&copy)
            .map_err(|e| MetaError::SerializationError(e.to_string()))?;
        Ok(EventId(blake3::hash(&bytes).to_hex().to_string()))
    }

    /// Normalize and append one event. Returns `false` for a duplicate.
    pub fn ingest<L: EventLog + ?Sized>(
        log: &mut L,
        event: Event,
        security: &SecurityConfig,
    ) -> Result<bool, MetaError> {
        log.append(Self::normalize(event, security)?)
    }

    /// Normalize and append a batch.
    ///
    /// Every event is validated before any is appended, so an invalid event
    /// rejects the whole batch.
    pub fn ingest_batch<L: EventLog + ?Sized>(
        log: &mut L,
        events: Vec<Event>,
        security: &SecurityConfig,
    ) -> Result<usize, MetaError> {
        if events.is_empty() {
            return Ok(0);
        }
        if events.len() > MAX_BATCH_LENGTH {
            return Err(MetaError::InvalidEvent(format!(
                "batch of {} events exceeds {}",
                events.len(),
                MAX_BATCH_LENGTH
            )));
        }
        let normalized = events
            .into_iter()
            .map(|e| Self::normalize(e, security))
            .collect::<Result<Vec<_>, _>>()?;
        log.append_batch(normalized)
    }
}

fn check_field(what: &str, value: &str) -> Result<(), MetaError> {
    if value.trim().is_empty() {
        return Err(MetaError::InvalidEvent(format!("{} is empty", what)));
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(MetaError::InvalidEvent(format!(
            "{} exceeds {} bytes",
            what, MAX_FIELD_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// WIRE FORM
// =============================================================================

/// Flat JSON form of an event, as producers submit it.
///
/// The action and the optional parent are separate fields here; converting
/// into an [`Event`] checks that they agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub entity: EntityDescriptor,
    pub author: Author,
    pub action: Action,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default)]
    pub features: Vec<FeatureValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
    #[serde(default)]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Submission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
}

impl TryFrom<RawEvent> for Event {
    type Error = MetaError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let missing_parent =
            || MetaError::InvalidEvent(format!("{} event requires a parent", raw.action));
        let derivation = match (raw.action, raw.parent.clone()) {
            (Action::Sourced, None) => Derivation::Sourced,
            (Action::Sourced, Some(_)) => {
                return Err(MetaError::InvalidEvent(
                    "sourced event cannot carry a parent".to_string(),
                ));
            }
            (Action::Mapped, parent) => Derivation::Mapped(parent),
            (Action::Extracted, Some(p)) => Derivation::Extracted(p),
            (Action::Augmented, Some(p)) => Derivation::Augmented(p),
            (Action::Enriched, Some(p)) => Derivation::Enriched(p),
            (Action::Extracted | Action::Augmented | Action::Enriched, None) => {
                return Err(missing_parent());
            }
        };

        let info = raw
            .info
            .map(|v| serde_json::to_string(&v))
            .transpose()
            .map_err(|e| MetaError::SerializationError(e.to_string()))?;

        Ok(Event {
            id: EventId(raw.id.unwrap_or_default()),
            entity: raw.entity,
            author: raw.author,
            timestamp: raw.timestamp,
            security: SecurityLabel::new(raw.security.unwrap_or_default()),
            features: raw.features,
            info,
            streams: raw.streams,
            source: raw.source,
            derivation,
        })
    }
}

impl From<&Event> for RawEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: Some(event.id.0.clone()),
            entity: event.entity.clone(),
            author: event.author.clone(),
            action: event.action(),
            timestamp: event.timestamp,
            security: Some(event.security.0.clone()),
            features: event.features.clone(),
            info: event
                .info
                .as_ref()
                .map(|i| {
                    serde_json::from_str(i).unwrap_or_else(|_| serde_json::Value::String(i.clone()))
                }),
            streams: event.streams.clone(),
            source: event.source.clone(),
            parent: event.parent().cloned(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::EntityHash;
    use std::collections::BTreeMap;

    fn raw(json: &str) -> RawEvent {
        serde_json::from_str(json).expect("parse raw event")
    }

    fn sourced(hash: &str) -> Event {
        Event::new(hash, Author::new("loader", "upload"), Timestamp(1), Derivation::Sourced)
    }

    #[test]
    fn validate_rejects_empty_hash() {
        assert!(matches!(
            Ingestor::validate(&sourced("  ")),
            Err(MetaError::InvalidHash)
        ));
    }

    #[test]
    fn validate_rejects_empty_author() {
        let event = Event::new("e1", Author::new("", "x"), Timestamp(1), Derivation::Sourced);
        assert!(Ingestor::validate(&event).is_err());
    }

    #[test]
    fn normalize_defaults_security_and_assigns_id() {
        let event =
            Ingestor::normalize(sourced("E1"), &SecurityConfig::default()).expect("normalize");
        assert_eq!(event.security.as_str(), "UNCLASSIFIED");
        assert_eq!(event.hash(), &EntityHash::new("e1"));
        assert_eq!(event.id.as_str().len(), 64);
    }

    #[test]
    fn content_id_is_reproducible() {
        let a = Ingestor::content_id(&sourced("e1")).expect("id");
        let b = Ingestor::content_id(&sourced("E1")).expect("id");
        let c = Ingestor::content_id(&sourced("e2")).expect("id");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn self_referential_event_is_accepted() {
        let parent = ParentRef {
            hash: EntityHash::new("e1"),
            author: Author::new("loader", "upload"),
            action: Action::Sourced,
            timestamp: Timestamp(0),
            relationship: BTreeMap::new(),
        };
        let event = Event::new(
            "e1",
            Author::new("plugin", "p"),
            Timestamp(1),
            Derivation::Extracted(parent),
        );
        let mut log = MemoryStore::new();
        assert!(Ingestor::ingest(&mut log, event, &SecurityConfig::default()).expect("ingest"));
    }

    #[test]
    fn batch_is_rejected_atomically() {
        let mut log = MemoryStore::new();
        let result = Ingestor::ingest_batch(
            &mut log,
            vec![sourced("e1"), sourced("")],
            &SecurityConfig::default(),
        );
        assert!(result.is_err());
        assert_eq!(log.event_count().expect("count"), 0);
    }

    #[test]
    fn raw_extracted_requires_parent() {
        let r = raw(
            r#"{"entity":{"hash":"E10"},"author":{"category":"plugin","name":"unzip"},
                "action":"extracted","timestamp":"2021-01-01T12:00:00Z"}"#,
        );
        assert!(Event::try_from(r).is_err());
    }

    #[test]
    fn raw_sourced_rejects_parent() {
        let r = raw(
            r#"{"entity":{"hash":"e1"},"author":{"category":"loader","name":"upload"},
                "action":"sourced","timestamp":"2021-01-01T12:00:00Z",
                "parent":{"hash":"e0","author":{"category":"x","name":"y"},"action":"sourced",
                          "timestamp":"2021-01-01T12:00:00Z"}}"#,
        );
        assert!(Event::try_from(r).is_err());
    }

    #[test]
    fn raw_info_kept_as_json_text() {
        let r = raw(
            r#"{"entity":{"hash":"e1"},"author":{"category":"plugin","name":"pe"},
                "action":"enriched","timestamp":"2021-01-01T12:00:00Z",
                "info":{"sections":3},
                "parent":{"hash":"e1","author":{"category":"plugin","name":"pe"},"action":"sourced",
                          "timestamp":"2021-01-01T12:00:00Z"}}"#,
        );
        let event = Event::try_from(r).expect("convert");
        assert_eq!(event.info.as_deref(), Some(r#"{"sections":3}"#));
        assert_eq!(event.action(), Action::Enriched);
    }
}
