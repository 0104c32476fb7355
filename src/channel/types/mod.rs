mod c2s;
mod s2c;
mod errors;

pub use errors::*;
pub use c2s::*;
pub use s2c::*;

use axum::extract::ws::{Message, WebSocket};

/// What a socket produced, after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Client(C2SMessage),
    /// Transport-level pong, answers our heartbeat ping
    Pong,
    /// Transport-level ping, answered by axum itself
    Control,
}

pub(crate) trait RecvAndDecode {
    async fn recv_and_decode(&mut self) -> Result<Incoming, RADError>;
}

impl RecvAndDecode for WebSocket {
    async fn recv_and_decode(&mut self) -> Result<Incoming, RADError> {
        let msg = self.recv().await.ok_or(RADError::StreamClosed)??;

        match msg {
            Message::Close(frame) => Err(RADError::Close(frame.map(|f| format!("code: {}, reason: {}", f.code, f.reason)))),
            Message::Pong(_) => Ok(Incoming::Pong),
            Message::Ping(_) => Ok(Incoming::Control),
            Message::Text(text) => Ok(Incoming::Client(C2SMessage::try_from(text.as_str().as_bytes())?)),
            Message::Binary(data) => Ok(Incoming::Client(C2SMessage::try_from(data.as_ref())?)),
        }
    }
}
