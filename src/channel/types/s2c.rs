use axum::extract::ws::Utf8Bytes;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::jobs::JobId;

/// Control frames the server answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum S2CMessage {
    Pong,
    #[serde(rename_all = "camelCase")]
    Subscribed { job_id: JobId, message: String },
    Error { message: String },
}

impl S2CMessage {
    pub fn subscribed(job_id: JobId) -> Self {
        let message = format!("Subscribed to job {job_id}");
        S2CMessage::Subscribed { job_id, message }
    }

    pub fn name(&self) -> &'static str {
        match self {
            S2CMessage::Pong => "s2c>pong",
            S2CMessage::Subscribed { .. } => "s2c>subscribed",
            S2CMessage::Error { .. } => "s2c>error",
        }
    }

    pub fn to_frame(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}

/// ISO 8601, UTC, millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serializes `{...payload, jobId?, timestamp}`.
///
/// `jobId` and `timestamp` belong to the channel and overwrite payload fields
/// with the same names.
pub fn event_frame(mut payload: Map<String, Value>, job_id: Option<&JobId>) -> Result<Utf8Bytes, serde_json::Error> {
    if let Some(job_id) = job_id {
        payload.insert("jobId".to_string(), Value::String(job_id.to_string()));
    }
    payload.insert("timestamp".to_string(), Value::String(timestamp()));
    serde_json::to_string(&payload).map(Utf8Bytes::from)
}
