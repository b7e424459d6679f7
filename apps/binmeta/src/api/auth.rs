//! # Authentication and Requester Identity
//!
//! Two concerns live here:
//!
//! - **API key**: if configured (`server.api_key` or `BINMETA_API_KEY`),
//!   every endpoint except `/health` requires
//!   `Authorization: Bearer <key>` (a raw key is accepted too).
//! - **Requester**: the `X-Binmeta-Labels` header lists the security labels
//!   the caller may read. It becomes the visibility predicate appended to
//!   every query, and its digest keys the caller's cache partition.
//!   Without the header the caller reads everything.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use binmeta_core::{
    Deadline, Field, Predicate, Requester, Visibility, checksum, primitives::MAX_FIELD_LENGTH,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;

/// Header carrying the caller's readable security labels, comma-separated.
pub const LABELS_HEADER: &str = "x-binmeta-labels";

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

/// Get API key from environment variable.
///
/// Returns `Some(key)` if `BINMETA_API_KEY` is set and non-empty.
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("BINMETA_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Constant-time key comparison over equal-length padded buffers.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let max_len = provided_bytes.len().max(expected_bytes.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided_bytes.len()].copy_from_slice(provided_bytes);
    padded_expected[..expected_bytes.len()].copy_from_slice(expected_bytes);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided_bytes.len() == expected_bytes.len()
}

/// API key authentication middleware.
///
/// `/health` is always allowed (for load balancer checks).
pub async fn api_key_auth_middleware(
    State(expected): State<Arc<String>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(header_value) => {
            let provided_key = header_value.strip_prefix("Bearer ").unwrap_or(header_value);
            if keys_match(provided_key, &expected) {
                Ok(next.run(request).await)
            } else {
                tracing::warn!(
                    event = "auth_failure",
                    reason = "invalid_api_key",
                    "Authentication failed: invalid API key"
                );
                Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
            }
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// =============================================================================
// REQUESTER
// =============================================================================

/// Parse the readable labels from `headers`.
///
/// `Ok(None)` when the header is absent. A header that is not visible
/// ASCII, lists no label, or carries an oversized label is rejected.
pub fn labels_from_headers(headers: &HeaderMap) -> Result<Option<BTreeSet<String>>, String> {
    let Some(value) = headers.get(LABELS_HEADER) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| format!("{} must be visible ASCII", LABELS_HEADER))?;
    let labels: BTreeSet<String> = text
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(format!("{} lists no label", LABELS_HEADER));
    }
    if labels.iter().any(|l| l.len() > MAX_FIELD_LENGTH) {
        return Err(format!(
            "{} label exceeds {} bytes",
            LABELS_HEADER, MAX_FIELD_LENGTH
        ));
    }
    Ok(Some(labels))
}

/// Build the requester for one HTTP call.
///
/// Callers with the same label set share a cache partition.
pub fn requester_from_headers(
    headers: &HeaderMap,
    timeout: Option<Duration>,
) -> Result<Requester, String> {
    let requester = match labels_from_headers(headers)? {
        None => Requester::anonymous(),
        Some(labels) => {
            let joined = labels.iter().cloned().collect::<Vec<_>>().join("\n");
            let fingerprint = format!("labels:{}", &checksum(joined.as_bytes())[..16]);
            Requester::new(
                fingerprint,
                Visibility::new(Predicate::any_of(Field::Security, labels)),
            )
        }
    };
    Ok(match timeout {
        Some(budget) => requester.with_deadline(Deadline::after(budget)),
        None => requester,
    })
}

// =============================================================================
// TESTS
// =============================================================================
