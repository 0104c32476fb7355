use axum::{routing::{get, post}, Router};
use crate::AppState;

mod http2ws;
mod types;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify", get(http2ws::verify))
        .route("/jobs", post(http2ws::create_job))
        .route("/jobs/{job_id}/token", post(http2ws::issue_token))
        .route("/jobs/{job_id}/events", post(http2ws::job_event))
        .route("/broadcast", post(http2ws::broadcast))
        .route("/clients", get(http2ws::clients))
}
