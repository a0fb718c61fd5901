use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metron_common::HASH_HEADER;

use crate::api::ApiError;
use crate::logging::TraceId;
use crate::state::AppState;

/// Largest request body accepted before decoding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Middleware that undoes the agent's payload envelope.
///
/// Gzipped bodies are inflated, a `HashSHA256` header is verified against
/// the inflated body, and the body is decrypted when a private key is
/// configured. On success the computed hash is echoed in the response. Bodies
/// that are neither compressed nor subject to a configured key pass through
/// untouched.
pub async fn decode_payload(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let gzipped = req
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("gzip"))
        .unwrap_or(false);
    if !gzipped && !state.decoder.is_active() {
        return next.run(req).await;
    }

    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();
    let hash = req
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let (mut parts, body) = req.into_parts();
    let raw = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request body rejected");
            return ApiError::BadRequest(format!("unreadable body: {e}")).into_response();
        }
    };

    let decoded = match state.decoder.decode(&raw, gzipped, hash.as_deref()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Payload rejected");
            return ApiError::from(e).into_response();
        }
    };

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    let mut response = next.run(Request::from_parts(parts, Body::from(decoded.body))).await;

    if let Some(computed) = decoded.computed_hash {
        if let Ok(val) = HeaderValue::from_str(&computed) {
            response.headers_mut().insert(HASH_HEADER, val);
        }
    }
    response
}
