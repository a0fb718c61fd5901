use axum::middleware;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;
use crate::{api, logging};

/// Assemble the HTTP application.
///
/// Requests pass through logging, then CORS and response compression, then
/// payload decoding, before reaching the metric handlers.
pub fn build_http_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::metric_routes()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::decode_payload,
        ))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
