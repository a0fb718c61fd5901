#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use metron_common::crypt;
use metron_common::{PayloadDecoder, PayloadEncoder};
use metron_server::app;
use metron_server::config::ServerConfig;
use metron_server::state::AppState;
use metron_storage::{open_store, StoreConfig};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const SIGN_KEY: &str = "test-sign-key";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

async fn build(
    store_config: StoreConfig,
    decoder: PayloadDecoder,
    temp_dir: TempDir,
) -> Result<TestContext> {
    let store = open_store(store_config).await?;
    let state = AppState::new(store, decoder, ServerConfig::default());
    let app = app::build_http_app(state.clone());
    Ok(TestContext { temp_dir, state, app })
}

/// Memory-backed server without signing or decryption.
pub async fn build_test_context() -> Result<TestContext> {
    build(StoreConfig::Memory, PayloadDecoder::default(), tempfile::tempdir()?).await
}

/// File-backed server writing its snapshot after every update.
pub async fn build_file_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = StoreConfig::File {
        path: temp_dir.path().join("metrics.json"),
        interval: std::time::Duration::ZERO,
        restore: false,
    };
    build(config, PayloadDecoder::default(), temp_dir).await
}

/// Memory-backed server that verifies `HashSHA256` and decrypts bodies.
/// Returns the matching agent-side encoder.
pub async fn build_secure_context() -> Result<(TestContext, PayloadEncoder)> {
    let pair = crypt::generate_keypair(1024)?;
    let private_key = crypt::parse_private_key(&pair.private_pem)?;
    let public_key = crypt::parse_public_key(&pair.public_pem)?;
    let key = SIGN_KEY.as_bytes().to_vec();
    let decoder = PayloadDecoder::new(Some(key.clone()), Some(private_key));
    let encoder = PayloadEncoder::new(Some(key), Some(public_key));
    let ctx = build(StoreConfig::Memory, decoder, tempfile::tempdir()?).await?;
    Ok((ctx, encoder))
}

/// Memory-backed server that verifies hashes but expects plaintext bodies.
pub async fn build_signed_context() -> Result<(TestContext, PayloadEncoder)> {
    let key = SIGN_KEY.as_bytes().to_vec();
    let decoder = PayloadDecoder::new(Some(key.clone()), None);
    let encoder = PayloadEncoder::new(Some(key), None);
    let ctx = build(StoreConfig::Memory, decoder, tempfile::tempdir()?).await?;
    Ok((ctx, encoder))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        text: String::from_utf8_lossy(&bytes).to_string(),
    }
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

/// POST a pre-encoded (gzipped, possibly encrypted) batch.
pub async fn request_encoded(
    app: &axum::Router,
    uri: &str,
    body: Vec<u8>,
    hash: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip");
    if let Some(hash) = hash {
        builder = builder.header(metron_common::HASH_HEADER, hash);
    }
    let req = builder.body(Body::from(body)).expect("request should build");
    send(app, req).await
}
