use axum::{middleware::from_fn, routing::get, Router};
use tower_http::trace::TraceLayer;

// WebSocket channel
pub mod channel;

// Producers
pub mod jobs;

// API
pub mod api;
pub use api::errors::{ApiError, ApiResult};

// Auth
pub mod auth;

// Config & state
pub mod state;
pub use state::{AppState, Config};

// Metrics
pub mod metrics;

// Utils
pub mod utils;

// Consts
mod consts;
pub use consts::*;

/// Assembles the whole server: the channel's upgrade route, the producer API,
/// health and (optionally) metrics.
///
/// Initializes `state.channel`, so call it once per state.
pub fn app(state: AppState, metrics: bool) -> Router {
    let api = Router::new()
        .nest("/v1", api::v1::router());

    Router::new()
        .merge(state.channel.initialize())
        .nest("/api", api)
        .route("/health", get(|| async { "ok" }))
        .merge(metrics::metrics_router(metrics))
        .layer(from_fn(metrics::track_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http().on_request(()))
}
