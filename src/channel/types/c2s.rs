use serde::Deserialize;
use serde_json::Value;

use super::DecodeError;
use crate::jobs::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum C2SMessage {
    Ping,
    #[serde(rename_all = "camelCase")]
    Subscribe {
        job_id: JobId,
        /// Only checked when subscriptions require a token
        #[serde(default)]
        token: Option<String>,
    },
}

impl C2SMessage {
    pub fn name(&self) -> &'static str {
        match self {
            C2SMessage::Ping => "c2s>ping",
            C2SMessage::Subscribe { .. } => "c2s>subscribe",
        }
    }
}

impl TryFrom<&[u8]> for C2SMessage {
    type Error = DecodeError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.is_empty() {
            return Err(DecodeError::Empty);
        }
        let value: Value = serde_json::from_slice(buf).map_err(DecodeError::Json)?;
        let kind = match value.get("type").and_then(Value::as_str) {
            Some("ping") => "ping",
            Some("subscribe") => "subscribe",
            Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
            None => return Err(DecodeError::MissingType),
        };
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields(kind, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<C2SMessage, DecodeError> {
        C2SMessage::try_from(raw.as_bytes())
    }

    #[test]
    fn ping_ignores_extra_fields() {
        assert_eq!(decode(r#"{"type":"ping"}"#).unwrap(), C2SMessage::Ping);
        assert_eq!(decode(r#"{"type":"ping","seq":3}"#).unwrap(), C2SMessage::Ping);
    }

    #[test]
    fn subscribe_with_and_without_token() {
        assert_eq!(
            decode(r#"{"type":"subscribe","jobId":"job-42"}"#).unwrap(),
            C2SMessage::Subscribe { job_id: JobId::new("job-42").unwrap(), token: None }
        );
        assert_eq!(
            decode(r#"{"type":"subscribe","jobId":7,"token":"abc"}"#).unwrap(),
            C2SMessage::Subscribe { job_id: JobId::new("7").unwrap(), token: Some("abc".to_string()) }
        );
    }

    #[test]
    fn rejects_bad_frames_with_typed_errors() {
        assert!(matches!(C2SMessage::try_from(&b""[..]), Err(DecodeError::Empty)));
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(r#"{"jobId":"a"}"#), Err(DecodeError::MissingType)));
        assert!(matches!(decode(r#"{"type":42}"#), Err(DecodeError::MissingType)));
        assert!(matches!(
            decode(r#"{"type":"unsubscribe","jobId":"a"}"#),
            Err(DecodeError::UnknownType(t)) if t == "unsubscribe"
        ));
        assert!(matches!(decode(r#"{"type":"subscribe"}"#), Err(DecodeError::InvalidFields("subscribe", _))));
        assert!(matches!(decode(r#"{"type":"subscribe","jobId":""}"#), Err(DecodeError::InvalidFields("subscribe", _))));
    }
}
