use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{channel::JobChannel, MAX_JOB_ID_LEN};

/// Opaque identifier of a background job.
///
/// Clients may send it as a JSON string or number, numbers are kept in their
/// decimal form so `42` and `"42"` name the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "RawJobId")]
pub struct JobId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidJobId {
    #[error("job id must not be empty")]
    Empty,
    #[error("job id is too long ({0} bytes)")]
    TooLong(usize),
}

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidJobId> {
        let id = id.into();
        if id.is_empty() {
            Err(InvalidJobId::Empty)
        } else if id.len() > MAX_JOB_ID_LEN {
            Err(InvalidJobId::TooLong(id.len()))
        } else {
            Ok(Self(id))
        }
    }

    /// Fresh random id for producers that don't have their own.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<RawJobId> for JobId {
    type Error = InvalidJobId;

    fn try_from(raw: RawJobId) -> Result<Self, Self::Error> {
        match raw {
            RawJobId::Text(text) => Self::new(text),
            RawJobId::Number(number) => Self::new(number.to_string()),
        }
    }
}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Producer handle bound to one job.
///
/// Every method returns how many connections the event was handed to.
#[derive(Debug, Clone)]
pub struct JobReporter {
    channel: Arc<JobChannel>,
    job_id: JobId,
}

impl JobReporter {
    pub fn new(channel: Arc<JobChannel>, job_id: JobId) -> Self {
        Self { channel, job_id }
    }

    /// Reporter for a newly minted job id.
    pub fn start(channel: Arc<JobChannel>) -> Self {
        Self::new(channel, JobId::generate())
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn emit(&self, kind: &str, fields: Map<String, Value>) -> usize {
        let mut payload = fields;
        payload.insert("type".to_string(), Value::String(kind.to_string()));
        self.channel.send_to_job(&self.job_id, payload)
    }

    pub fn progress(&self, percent: u8, message: impl Into<String>) -> usize {
        let mut fields = Map::new();
        fields.insert("percent".to_string(), Value::from(percent.min(100)));
        fields.insert("message".to_string(), Value::String(message.into()));
        self.emit("progress", fields)
    }

    pub fn completed(&self, result: Value) -> usize {
        let mut fields = Map::new();
        fields.insert("result".to_string(), result);
        self.emit("completed", fields)
    }

    pub fn failed(&self, error: impl fmt::Display) -> usize {
        let mut fields = Map::new();
        fields.insert("error".to_string(), Value::String(error.to_string()));
        self.emit("failed", fields)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::channel::{ChannelSettings, Connection};

    #[test]
    fn job_id_accepts_strings_and_numbers() {
        let text: JobId = serde_json::from_value(json!("job-42")).unwrap();
        let number: JobId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(text.as_str(), "job-42");
        assert_eq!(number, JobId::new("42").unwrap());
    }

    #[test]
    fn job_id_rejects_empty_and_oversized() {
        assert!(serde_json::from_value::<JobId>(json!("")).is_err());
        assert_eq!(JobId::new(""), Err(InvalidJobId::Empty));
        let long = "x".repeat(MAX_JOB_ID_LEN + 1);
        assert_eq!(JobId::new(long), Err(InvalidJobId::TooLong(MAX_JOB_ID_LEN + 1)));
        assert!(serde_json::from_value::<JobId>(json!(true)).is_err());
    }

    #[test]
    fn job_id_serializes_as_plain_string() {
        let id = JobId::new("sync-7").unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("sync-7"));
        assert_ne!(JobId::generate(), JobId::generate());
    }

    #[tokio::test]
    async fn reporter_emits_typed_events() {
        let channel = JobChannel::new(ChannelSettings {
            heartbeat_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let _router = channel.initialize();

        let reporter = JobReporter::start(Arc::clone(&channel));
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx));
        conn.subscribe(reporter.job_id().clone());
        channel.register(Arc::clone(&conn));

        assert_eq!(reporter.progress(150, "copying controls"), 1);
        assert_eq!(reporter.failed("upstream timeout"), 1);

        let progress: Value = serde_json::from_str(rx.recv().await.unwrap().as_str()).unwrap();
        assert_eq!(progress["type"], "progress");
        assert_eq!(progress["percent"], 100);
        assert_eq!(progress["message"], "copying controls");
        assert_eq!(progress["jobId"], reporter.job_id().as_str());

        let failed: Value = serde_json::from_str(rx.recv().await.unwrap().as_str()).unwrap();
        assert_eq!(failed["type"], "failed");
        assert_eq!(failed["error"], "upstream timeout");
    }
}
