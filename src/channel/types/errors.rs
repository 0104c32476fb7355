use thiserror::Error;

/// Why an inbound frame could not be turned into a [`super::C2SMessage`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no \"type\" field")]
    MissingType,
    #[error("unknown message type \"{0}\"")]
    UnknownType(String),
    #[error("invalid {0} message: {1}")]
    InvalidFields(&'static str, #[source] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RADError {
    #[error("message decode error due: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("close, frame: {0:?}")]
    Close(Option<String>),
    #[error(transparent)]
    WebSocketError(#[from] axum::Error),
    #[error("stream closed")]
    StreamClosed,
}

#[cfg(test)]
#[test]
fn decode_error_display() {
    use DecodeError::*;
    assert_eq!(Empty.to_string(), "empty frame");
    assert_eq!(MissingType.to_string(), "frame has no \"type\" field");
    assert_eq!(
        UnknownType("unsubscribe".to_string()).to_string(),
        "unknown message type \"unsubscribe\""
    );
    assert_eq!(
        RADError::from(UnknownType("x".to_string())).to_string(),
        "message decode error due: unknown message type \"x\""
    );
}
