use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use metron_common::HASH_HEADER;
use rand::Rng;

/// Response header carrying the request's trace id.
pub const TRACE_HEADER: &str = "X-Trace-Id";

/// Longest error body copied into the log line.
const MAX_REASON_CHARS: usize = 160;

/// Error bodies larger than this are not read back for logging.
const MAX_REASON_BODY_BYTES: usize = 64 * 1024;

/// Per-request trace id, stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

fn new_trace_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// What the log records about an incoming metric request.
///
/// Bodies are never logged: they are gzipped, encrypted, or metric batches
/// that would flood the log.
#[derive(Debug, PartialEq)]
struct Inbound {
    encoding: String,
    signed: bool,
    bytes: Option<u64>,
}

impl Inbound {
    fn from_headers(headers: &HeaderMap) -> Self {
        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("identity")
            .to_ascii_lowercase();
        Self {
            encoding,
            signed: has_hash(headers),
            bytes: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        }
    }
}

fn has_hash(headers: &HeaderMap) -> bool {
    headers
        .get(HASH_HEADER)
        .is_some_and(|v| !v.as_bytes().is_empty())
}

/// First line of a plain-text error body, cut to `max` characters.
fn error_reason(body: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(body);
    let line = text.lines().next().unwrap_or("").trim();
    match line.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

/// Read back an uncompressed error body so its reason can be logged.
///
/// Returns the rebuilt response and the reason, empty when the body was not
/// read.
async fn take_reason(response: Response) -> (Response, String) {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error())
        || response.headers().contains_key(CONTENT_ENCODING)
    {
        return (response, String::new());
    }
    let (parts, body) = response.into_parts();
    match to_bytes(body, MAX_REASON_BODY_BYTES).await {
        Ok(bytes) => {
            let reason = error_reason(&bytes, MAX_REASON_CHARS);
            (Response::from_parts(parts, Body::from(bytes)), reason)
        }
        Err(_) => (
            Response::from_parts(parts, Body::empty()),
            "<unreadable body>".to_string(),
        ),
    }
}

fn log_outcome(trace_id: &str, status: StatusCode, elapsed_ms: u64, hashed: bool, reason: &str) {
    let code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(trace_id, status = code, elapsed_ms, reason, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id, status = code, elapsed_ms, reason, "<-- response");
    } else {
        tracing::info!(trace_id, status = code, elapsed_ms, hashed, "<-- response");
    }
}

/// Request/response logging middleware.
///
/// Tags every request with a fresh [`TraceId`], logs the payload envelope
/// on the way in and the outcome on the way out, and returns the id in
/// [`TRACE_HEADER`]. Failed requests log the error text the client got.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = new_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let inbound = Inbound::from_headers(req.headers());
    tracing::info!(
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
        encoding = %inbound.encoding,
        signed = inbound.signed,
        bytes = inbound.bytes,
        "--> request"
    );

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let hashed = has_hash(response.headers());
    let (mut response, reason) = take_reason(response).await;
    log_outcome(&trace_id, response.status(), elapsed_ms, hashed, &reason);

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, val);
    }
    response
}
