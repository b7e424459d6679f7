//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Reads take the session's read lock and run the synchronous core
//! directly; ingestion takes the write lock.

use super::{
    AppState,
    auth::requester_from_headers,
    types::{
        ExportResponse, HealthResponse, IngestRequest, IngestResponse, NearbyRequest,
        NearbyResponse, ReadRequest, ReadResponse, StatusResponse, SummaryRequest,
        SummaryResponse,
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use binmeta_core::{EntityHash, MetaError, Requester, checksum, primitives::MAX_FIELD_LENGTH};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP status for a core error.
///
/// Caller mistakes are 400, an expired deadline is 504, and everything
/// else is a server-side failure.
pub fn status_for(error: &MetaError) -> StatusCode {
    match error {
        MetaError::InvalidEvent(_) | MetaError::InvalidHash | MetaError::ConfigError(_) => {
            StatusCode::BAD_REQUEST
        }
        MetaError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        MetaError::Executor(_)
        | MetaError::SerializationError(_)
        | MetaError::DeserializationError(_)
        | MetaError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Validate the path hash and identify the caller.
fn read_target(
    state: &AppState,
    headers: &HeaderMap,
    hash: &str,
) -> Result<(EntityHash, Requester), MetaError> {
    let hash = EntityHash::new(hash);
    if hash.is_empty() || hash.as_str().len() > MAX_FIELD_LENGTH {
        return Err(MetaError::InvalidHash);
    }
    let requester =
        requester_from_headers(headers, state.request_timeout).map_err(MetaError::InvalidEvent)?;
    Ok((hash, requester))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// STATUS HANDLER
// =============================================================================

/// Event log status.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let counts = session
        .event_count()
        .and_then(|events| Ok((events, session.entity_count()?)));

    match counts {
        Ok((event_count, entity_count)) => {
            let cache = session.cache_stats();
            let response = StatusResponse {
                event_count,
                entity_count,
                persistent: session.is_persistent(),
                cache_hits: cache.hits,
                cache_misses: cache.misses,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "status failed");
            (status_for(&e), e.to_string()).into_response()
        }
    }
}

// =============================================================================
// INGEST HANDLER
// =============================================================================

/// Ingest a batch of events. The batch is validated as a whole first.
pub async fn ingest_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> impl IntoResponse {
    let events = match request.to_events() {
        Ok(events) => events,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(IngestResponse::error(format!("Invalid events: {}", e))),
            );
        }
    };

    let received = events.len();
    let mut session = state.session.write().await;
    match session.ingest_batch(events) {
        Ok(ingested) => {
            tracing::info!(received, ingested, "events ingested");
            (
                StatusCode::OK,
                Json(IngestResponse::success(received, ingested)),
            )
        }
        Err(e) => (
            status_for(&e),
            Json(IngestResponse::error(format!("Ingest failed: {}", e))),
        ),
    }
}

// =============================================================================
// SUMMARY HANDLER
// =============================================================================

/// Summarize one entity.
pub async fn summary_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SummaryRequest>,
) -> impl IntoResponse {
    let result = read_target(&state, &headers, &hash).and_then(|(hash, requester)| {
        let options = request.to_options()?;
        Ok((hash, requester, options))
    });
    let (hash, requester, options) = match result {
        Ok(parts) => parts,
        Err(e) => return (status_for(&e), Json(SummaryResponse::error(hash, e.to_string()))),
    };

    let session = state.session.read().await;
    match session.summarize(&requester, &hash, &options) {
        Ok(summary) => (
            StatusCode::OK,
            Json(SummaryResponse::success(hash.as_str(), summary)),
        ),
        Err(e) => {
            tracing::warn!(hash = %hash, error = %e, "summary failed");
            (
                status_for(&e),
                Json(SummaryResponse::error(hash.as_str(), e.to_string())),
            )
        }
    }
}

// =============================================================================
// NEARBY HANDLER
// =============================================================================

/// Provenance neighborhood of one entity.
pub async fn nearby_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    Json(request): Json<NearbyRequest>,
) -> impl IntoResponse {
    let result = read_target(&state, &headers, &hash).and_then(|(hash, requester)| {
        let options = request.to_options()?;
        Ok((hash, requester, options))
    });
    let (hash, requester, options) = match result {
        Ok(parts) => parts,
        Err(e) => return (status_for(&e), Json(NearbyResponse::error(e.to_string()))),
    };

    let session = state.session.read().await;
    match session.nearby(&requester, &hash, &options) {
        Ok(result) => (StatusCode::OK, Json(NearbyResponse::success(result))),
        Err(e) => {
            tracing::warn!(hash = %hash, error = %e, "neighborhood failed");
            (status_for(&e), Json(NearbyResponse::error(e.to_string())))
        }
    }
}

// =============================================================================
// FULL READ HANDLER
// =============================================================================

/// Summary and, if requested, the neighborhood in one call.
pub async fn read_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ReadRequest>,
) -> impl IntoResponse {
    let result = read_target(&state, &headers, &hash).and_then(|(hash, requester)| {
        let options = request.to_options()?;
        Ok((hash, requester, options))
    });
    let (hash, requester, options) = match result {
        Ok(parts) => parts,
        Err(e) => return (status_for(&e), Json(ReadResponse::error(e.to_string()))),
    };

    let session = state.session.read().await;
    match session.read_full(&requester, &hash, &options) {
        Ok(read) => (StatusCode::OK, Json(ReadResponse::success(read))),
        Err(e) => {
            tracing::warn!(hash = %hash, error = %e, "full read failed");
            (status_for(&e), Json(ReadResponse::error(e.to_string())))
        }
    }
}

// =============================================================================
// EXPORT HANDLER
// =============================================================================

/// Export the event log in the portable persistence format.
pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;

    let exported = session
        .event_count()
        .and_then(|count| Ok((count, session.export_bytes()?)));
    match exported {
        Ok((count, data)) => {
            let digest = checksum(&data);
            (
                StatusCode::OK,
                Json(ExportResponse::success(&data, digest, count)),
            )
        }
        Err(e) => (
            status_for(&e),
            Json(ExportResponse::error(format!("Export failed: {}", e))),
        ),
    }
}
