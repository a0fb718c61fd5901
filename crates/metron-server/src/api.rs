use std::fmt::Write;
use std::future::Future;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metron_common::{MetricKind, MetricRecord, MetricValue, MetricWire, PayloadError, WireError};
use metron_storage::StorageError;
use serde::Deserialize;

use crate::state::AppState;

/// Handler error, rendered as a plain-text body with the mapped status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotImplemented(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl From<WireError> for ApiError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::UnknownKind(kind) => {
                ApiError::NotImplemented(format!("unknown metric type '{kind}'"))
            }
            WireError::Malformed(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_rejected_write() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<PayloadError> for ApiError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Signature => {
                ApiError::BadRequest("Invalid HashSHA256 header value".to_string())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
        };
        (status, message).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run a store call under the request deadline.
async fn bounded<T, F>(state: &AppState, fut: F) -> ApiResult<T>
where
    F: Future<Output = metron_storage::Result<T>>,
{
    match tokio::time::timeout(state.request_timeout, fut).await {
        Ok(res) => res.map_err(ApiError::from),
        Err(_) => Err(ApiError::Internal("storage timed out".to_string())),
    }
}

async fn apply(state: &AppState, record: &MetricRecord) -> ApiResult<MetricRecord> {
    match record.value {
        MetricValue::Gauge(v) => bounded(state, state.store.update_gauge(&record.id, v)).await,
        MetricValue::Counter(d) => bounded(state, state.store.update_counter(&record.id, d)).await,
    }
}

/// Decode a wire record, checking its own hash when one is present.
fn accept(state: &AppState, wire: MetricWire) -> ApiResult<MetricRecord> {
    let hash = wire.hash.clone();
    let record = MetricRecord::try_from(wire)?;
    state.decoder.check_record(&record, hash.as_deref())?;
    Ok(record)
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

async fn update_plain(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let kind: MetricKind = kind.parse()?;
    let value = MetricValue::parse(kind, &value)?;
    apply(&state, &MetricRecord { id, value }).await?;
    Ok(StatusCode::OK)
}

async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<MetricWire>> {
    let record = accept(&state, parse_json(&body)?)?;
    let stored = apply(&state, &record).await?;
    Ok(Json(MetricWire::from(stored)))
}

async fn update_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    let wires: Vec<MetricWire> = parse_json(&body)?;
    let records = wires
        .into_iter()
        .map(|wire| accept(&state, wire))
        .collect::<ApiResult<Vec<_>>>()?;
    bounded(&state, state.store.update_batch(&records)).await?;
    tracing::debug!(records = records.len(), "Batch applied");
    Ok(StatusCode::OK)
}

/// Fetch `id` and require it to be of `kind`.
async fn lookup(state: &AppState, kind: MetricKind, id: &str) -> ApiResult<MetricRecord> {
    match bounded(state, state.store.get(id)).await? {
        Some(record) if record.kind() == kind => Ok(record),
        _ => Err(ApiError::NotFound(format!("{kind} '{id}' not found"))),
    }
}

async fn value_plain(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse()?;
    let record = lookup(&state, kind, &id).await?;
    Ok(record.value.to_string())
}

#[derive(Debug, Deserialize)]
struct ValueQuery {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<MetricWire>> {
    let query: ValueQuery = parse_json(&body)?;
    let kind: MetricKind = query.kind.parse()?;
    let record = lookup(&state, kind, &query.id).await?;
    Ok(Json(MetricWire::from(record)))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let snapshot = bounded(&state, state.store.get_all()).await?;
    let mut records: Vec<MetricRecord> = snapshot.into_values().collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));

    let mut page = String::from("<!DOCTYPE html>\n<html><head><title>Metrics</title></head>");
    page.push_str("<body>\n<table>\n");
    page.push_str("<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n");
    for record in &records {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&record.id),
            record.kind(),
            record.value
        );
    }
    page.push_str("</table>\n</body></html>\n");
    Ok(Html(page))
}

async fn ping(State(state): State<AppState>) -> ApiResult<StatusCode> {
    bounded(&state, state.store.health_check()).await?;
    Ok(StatusCode::OK)
}

pub fn metric_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/{kind}/{id}/{value}", post(update_plain))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{id}", get(value_plain))
}
