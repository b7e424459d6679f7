//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use binmeta_core::{
    Event, FullRead, MetaError, NearbyOptions, NeighborhoodResult, RawEvent, ReadOptions, Section,
    Summary, SummaryOptions,
    primitives::{MAX_BATCH_LENGTH, MAX_FIELD_LENGTH, MAX_TRAVERSAL_ROUNDS},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound on `max_cousins` accepted from a client.
pub const MAX_COUSINS_LIMIT: usize = 1000;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Event log status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub event_count: usize,
    pub entity_count: usize,
    pub persistent: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

// =============================================================================
// INGEST REQUEST/RESPONSE
// =============================================================================

/// Batch ingest request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<RawEvent>,
}

impl IngestRequest {
    /// Convert the wire events, rejecting the whole batch on the first
    /// malformed one.
    pub fn to_events(&self) -> Result<Vec<Event>, MetaError> {
        if self.events.is_empty() {
            return Err(MetaError::InvalidEvent("batch is empty".to_string()));
        }
        if self.events.len() > MAX_BATCH_LENGTH {
            return Err(MetaError::InvalidEvent(format!(
                "batch of {} events exceeds maximum {}",
                self.events.len(),
                MAX_BATCH_LENGTH
            )));
        }
        self.events.iter().cloned().map(Event::try_from).collect()
    }
}

/// Batch ingest response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub received: usize,
    /// Events that were not already in the log.
    pub ingested: usize,
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn success(received: usize, ingested: usize) -> Self {
        Self {
            success: true,
            received,
            ingested,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            received: 0,
            ingested: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// SUMMARY REQUEST/RESPONSE
// =============================================================================

/// Summary request. Section names are case-insensitive and accept `_`
/// for `-`; omitted sections mean the default set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryRequest {
    pub sections: Option<Vec<String>>,
    pub author: Option<String>,
}

impl SummaryRequest {
    pub fn to_options(&self) -> Result<SummaryOptions, MetaError> {
        let mut options = match &self.sections {
            Some(names) => SummaryOptions::only(
                names
                    .iter()
                    .map(|n| n.parse::<Section>())
                    .collect::<Result<BTreeSet<_>, _>>()?,
            ),
            None => SummaryOptions::default(),
        };
        if let Some(author) = &self.author {
            let author = author.trim();
            if author.is_empty() || author.len() > MAX_FIELD_LENGTH {
                return Err(MetaError::InvalidEvent(format!(
                    "author must be 1..={} bytes",
                    MAX_FIELD_LENGTH
                )));
            }
            options = options.with_author(author);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub success: bool,
    pub hash: String,
    pub summary: Option<Summary>,
    pub error: Option<String>,
}

impl SummaryResponse {
    pub fn success(hash: impl Into<String>, summary: Summary) -> Self {
        Self {
            success: true,
            hash: hash.into(),
            summary: Some(summary),
            error: None,
        }
    }

    pub fn error(hash: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            hash: hash.into(),
            summary: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// NEARBY REQUEST/RESPONSE
// =============================================================================

/// Neighborhood request. Omitted limits take the engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NearbyRequest {
    pub include_cousins: bool,
    pub max_cousins: Option<usize>,
    pub max_cousin_distance: Option<usize>,
}

impl NearbyRequest {
    pub fn to_options(&self) -> Result<NearbyOptions, MetaError> {
        let defaults = NearbyOptions::default();
        let max_cousins = self.max_cousins.unwrap_or(defaults.max_cousins);
        let max_cousin_distance = self
            .max_cousin_distance
            .unwrap_or(defaults.max_cousin_distance);
        if max_cousins > MAX_COUSINS_LIMIT {
            return Err(MetaError::InvalidEvent(format!(
                "max_cousins {} exceeds maximum {}",
                max_cousins, MAX_COUSINS_LIMIT
            )));
        }
        if max_cousin_distance > MAX_TRAVERSAL_ROUNDS {
            return Err(MetaError::InvalidEvent(format!(
                "max_cousin_distance {} exceeds maximum {}",
                max_cousin_distance, MAX_TRAVERSAL_ROUNDS
            )));
        }
        Ok(NearbyOptions {
            include_cousins: self.include_cousins,
            max_cousins,
            max_cousin_distance,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyResponse {
    pub success: bool,
    pub result: Option<NeighborhoodResult>,
    pub error: Option<String>,
}

impl NearbyResponse {
    pub fn success(result: NeighborhoodResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// FULL READ REQUEST/RESPONSE
// =============================================================================

/// Summary plus an optional neighborhood.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadRequest {
    pub summary: SummaryRequest,
    pub nearby: Option<NearbyRequest>,
}

impl ReadRequest {
    pub fn to_options(&self) -> Result<ReadOptions, MetaError> {
        Ok(ReadOptions {
            summary: self.summary.to_options()?,
            nearby: self.nearby.as_ref().map(NearbyRequest::to_options).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub success: bool,
    pub read: Option<FullRead>,
    pub error: Option<String>,
}

impl ReadResponse {
    pub fn success(read: FullRead) -> Self {
        Self {
            success: true,
            read: Some(read),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            read: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// EXPORT RESPONSE
// =============================================================================

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded
    /// blake3 of the decoded bytes, hex encoded.
    pub checksum: Option<String>,
    pub event_count: usize,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: &[u8], checksum: String, event_count: usize) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            checksum: Some(checksum),
            event_count,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            event_count: 0,
            error: Some(msg.into()),
        }
    }
}
