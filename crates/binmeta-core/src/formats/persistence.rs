//! # Persistence Format
//!
//! Portable binary form of an event log, used by export and import.
//! File I/O lives in the app layer; this module only transforms bytes.
//!
//! Format: Header (5 bytes) + postcard-serialized event list.
//! - 4 bytes: Magic ("BMET")
//! - 1 byte: Version
//!
//! Events are written in id order, so exporting the same log twice yields
//! identical bytes.
//!
//! ## Size Limits
//!
//! The payload size is checked before deserialization starts, so a corrupt
//! or hostile file cannot drive an oversized allocation.

use crate::{Event, MetaError, primitives};

/// Maximum allowed payload size for the persistence format (500 MB).
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all event data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a header with the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), MetaError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(MetaError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(MetaError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetaError> {
        match bytes {
            [a, b, c, d, version, ..] => Ok(Self {
                magic: [*a, *b, *c, *d],
                version: *version,
            }),
            _ => Err(MetaError::DeserializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize events to bytes (header + payload).
///
/// Events are sorted by id before encoding.
pub fn events_to_bytes(events: &[Event]) -> Result<Vec<u8>, MetaError> {
    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let payload = postcard::to_stdvec(&sorted)
        .map_err(|e| MetaError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize events from bytes.
///
/// Validates, in order: minimum size, maximum size, header. Only then is
/// the payload decoded.
pub fn events_from_bytes(bytes: &[u8]) -> Result<Vec<Event>, MetaError> {
    if bytes.len() < HEADER_SIZE {
        return Err(MetaError::DeserializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_SIZE
        )));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(MetaError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        MetaError::DeserializationError(format!("Failed to deserialize event data: {}", e))
    })
}

/// blake3 checksum of serialized bytes, hex encoded.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Author, Derivation, EventId, FeatureValue, Submission, Timestamp};
    use std::collections::BTreeMap;

    fn sample() -> Vec<Event> {
        let mut a = Event::new(
            "e1",
            Author::new("loader", "upload"),
            Timestamp(5),
            Derivation::Sourced,
        )
        .with_source(Submission {
            name: "s1".into(),
            timestamp: Timestamp(5),
            references: BTreeMap::from([("user".to_string(), "bob".to_string())]),
            settings: BTreeMap::new(),
            depth: 0,
        })
        .with_features(vec![FeatureValue::new("f1", "v1")])
        .with_security("UNCLASSIFIED");
        a.id = EventId("b".into());
        a.info = Some(r#"{"k":1}"#.into());
        let mut b = Event::new(
            "e2",
            Author::new("plugin", "p"),
            Timestamp(6),
            Derivation::Mapped(None),
        );
        b.id = EventId("a".into());
        vec![a, b]
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let restored = PersistenceHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
    }

    #[test]
    fn export_is_bit_exact_and_ordered() {
        let events = sample();
        let bytes1 = events_to_bytes(&events).expect("serialize");
        let restored = events_from_bytes(&bytes1).expect("deserialize");
        assert_eq!(restored[0].id.as_str(), "a");
        assert_eq!(restored[1], events[0]);

        let bytes2 = events_to_bytes(&restored).expect("serialize again");
        assert_eq!(bytes1, bytes2, "save -> load -> save must produce identical bytes");
        assert_eq!(checksum(&bytes1), checksum(&bytes2));
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(events_from_bytes(&bytes).is_err());
    }

    #[test]
    fn short_input_rejected() {
        assert!(events_from_bytes(b"BM").is_err());
    }
}
