use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::{
    api::errors::error_and_log, auth::Token, jobs::JobId, ApiError, ApiResult, AppState,
};

use super::types::{Clients, Delivery, JobTicket};

pub(super) async fn verify(
    Token(token): Token,
    State(state): State<AppState>,
) -> ApiResult<&'static str> {
    state.config.read().await.verify_token(&token)?;
    Ok("ok")
}

/// Mints a job id for a producer, with a subscribe token when they're required.
#[instrument(skip(token, state))]
pub(super) async fn create_job(
    Token(token): Token,
    State(state): State<AppState>,
) -> ApiResult<Json<JobTicket>> {
    let config = state.config.read().await;
    config.verify_token(&token)?;

    let job_id = JobId::generate();
    let token = config.subscribe.authorizer().map(|authorizer| authorizer.issue(&job_id));
    tracing::debug!(%job_id, "Job id issued");
    Ok(Json(JobTicket { job_id, token }))
}

#[instrument(skip(token, state))]
pub(super) async fn issue_token(
    Token(token): Token,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<JobTicket>> {
    let config = state.config.read().await;
    config.verify_token(&token)?;

    let job_id = parse_job_id(job_id)?;
    let authorizer = config.subscribe.authorizer().ok_or_else(|| {
        tracing::warn!("subscribe tokens are disabled");
        ApiError::NotFound
    })?;
    let token = Some(authorizer.issue(&job_id));
    Ok(Json(JobTicket { job_id, token }))
}

#[instrument(skip(token, state, payload))]
pub(super) async fn job_event(
    Token(token): Token,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<Json<Delivery>> {
    state.config.read().await.verify_token(&token)?;
    let job_id = parse_job_id(job_id)?;
    tracing::trace!(payload = ?payload);

    let delivered = state.channel.send_to_job(&job_id, payload);
    Ok(Json(Delivery { delivered }))
}

#[instrument(skip(token, state, payload))]
pub(super) async fn broadcast(
    Token(token): Token,
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> ApiResult<Json<Delivery>> {
    state.config.read().await.verify_token(&token)?;
    tracing::trace!(payload = ?payload);

    let delivered = state.channel.broadcast(payload);
    Ok(Json(Delivery { delivered }))
}

pub(super) async fn clients(
    Token(token): Token,
    State(state): State<AppState>,
) -> ApiResult<Json<Clients>> {
    state.config.read().await.verify_token(&token)?;
    Ok(Json(Clients { clients: state.channel.client_count() }))
}

fn parse_job_id(raw: String) -> ApiResult<JobId> {
    JobId::new(raw).map_err(|err| { tracing::warn!("invalid job id"); error_and_log(err, ApiError::BadRequest) })
}
