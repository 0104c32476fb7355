use std::sync::Arc;

use anyhow::{anyhow, bail};
use axum::{
    body::Bytes,
    extract::{ws::{Message, Utf8Bytes, WebSocket}, State, WebSocketUpgrade},
    response::Response,
};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::{auth::TokenError, jobs::JobId, metrics::DECODE_ERRORS, state::AppState, CLOSE_TIMEOUT};

use super::{C2SMessage, Connection, Incoming, RADError, RecvAndDecode, S2CMessage};

pub async fn initial(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut ws: WebSocket, state: AppState) {
    let channel = Arc::clone(&state.channel);
    let _guard = channel.track_socket();

    // Channel for frames relayed by producers
    let (tx, rx) = mpsc::channel(channel.settings().queue_capacity);
    let conn = Arc::new(Connection::new(tx));
    channel.register(Arc::clone(&conn));
    tracing::debug!(conn_id = %conn.id, clients = channel.client_count(), "[WebSocket] New connection");

    if let Err(kind) = main_worker(&conn, rx, &mut ws, &state).await {
        tracing::info!(error = %kind, conn_id = %conn.id, "Main worker exited");
    }

    channel.unregister(&conn.id);
    tracing::debug!(conn_id = %conn.id, clients = channel.client_count(), "[WebSocket] Connection removed");

    // Closing connection, a peer that stopped reading won't take it
    match tokio::time::timeout(CLOSE_TIMEOUT, ws.send(Message::Close(None))).await {
        Ok(Err(kind)) => tracing::trace!("[WebSocket] Closing fault: {}", kind),
        Err(_) => tracing::debug!(conn_id = %conn.id, "[WebSocket] Close frame timed out"),
        Ok(Ok(())) => (),
    }
}

#[instrument(skip_all, fields(conn_id = %conn.id))]
async fn main_worker(
    conn: &Connection,
    mut rx: mpsc::Receiver<Utf8Bytes>,
    ws: &mut WebSocket,
    state: &AppState,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            external_msg = ws.recv_and_decode() => {

                // Getting a value or halt the worker without an error
                let external_msg = match external_msg {
                    Ok(m) => m,
                    Err(kind) => {
                        match kind {
                            RADError::Close(_) => return Ok(()),
                            RADError::StreamClosed => return Ok(()),
                            RADError::DecodeError(kind) => {
                                DECODE_ERRORS.inc();
                                tracing::warn!(error = %kind, "[WebSocket] Malformed message, ignored");
                                reply(conn, ws, &S2CMessage::Error { message: kind.to_string() }).await?;
                                continue;
                            },
                            _ => return Err(kind.into())
                        }
                    },
                };

                match external_msg {
                    Incoming::Pong => conn.mark_alive(),
                    Incoming::Control => (),
                    Incoming::Client(msg) => {
                        tracing::trace!(msg = msg.name());
                        match msg {
                            C2SMessage::Ping => reply(conn, ws, &S2CMessage::Pong).await?,
                            C2SMessage::Subscribe { job_id, token } => {
                                let answer = match authorize(state, &job_id, token.as_deref()).await {
                                    Ok(()) => {
                                        let previous = conn.subscribe(job_id.clone());
                                        tracing::debug!(%job_id, ?previous, "[WebSocket] Subscribed");
                                        S2CMessage::subscribed(job_id)
                                    },
                                    Err(kind) => {
                                        tracing::warn!(%job_id, error = %kind, "[WebSocket] Subscription rejected");
                                        S2CMessage::Error { message: format!("subscription to job {job_id} rejected: {kind}") }
                                    },
                                };
                                reply(conn, ws, &answer).await?
                            },
                        }
                    },
                }
            },
            internal_msg = rx.recv() => {
                let frame = internal_msg.ok_or(anyhow!("Unexpected error! Session channel broken!"))?;
                send(conn, ws, Message::Text(frame)).await?
            },
            () = conn.ping_requested() => {
                send(conn, ws, Message::Ping(Bytes::new())).await?
            },
            () = conn.terminated() => {
                bail!("terminated by the channel")
            },
        }
    }
}

async fn reply(conn: &Connection, ws: &mut WebSocket, msg: &S2CMessage) -> anyhow::Result<()> {
    tracing::trace!(msg = msg.name(), "[WebSocket] Answering");
    send(conn, ws, Message::Text(msg.to_frame()?)).await
}

/// Writes a frame unless the connection gets terminated first.
async fn send(conn: &Connection, ws: &mut WebSocket, msg: Message) -> anyhow::Result<()> {
    tokio::select! {
        res = ws.send(msg) => Ok(res?),
        () = conn.terminated() => bail!("terminated by the channel while writing"),
    }
}

async fn authorize(state: &AppState, job_id: &JobId, token: Option<&str>) -> Result<(), TokenError> {
    match state.config.read().await.subscribe.authorizer() {
        Some(authorizer) => authorizer.verify(job_id, token.ok_or(TokenError::Missing)?),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio_tungstenite::connect_async;

    use crate::Config;

    use super::*;

    async fn serve(config: &str) -> (std::net::SocketAddr, AppState) {
        let state = AppState::new(Config::from_toml(config).unwrap());
        let app = crate::app(state.clone(), false);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, state)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn evicted_reader_stuck_in_write_is_released() {
        let (addr, state) = serve(
            r#"
            listen = "127.0.0.1:0"
            [channel]
            heartbeatInterval = 1
            queueCapacity = 4
            "#,
        )
        .await;

        // Handshake done, never read again
        let (_frozen, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        let conn = loop {
            if let Some(entry) = state.channel.connections.iter().next() {
                break Arc::clone(entry.value());
            }
            assert!(tokio::time::Instant::now() < deadline, "connection never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        // Enough to fill both socket buffers so the task blocks in a write
        let blob = "x".repeat(256 * 1024);
        for _ in 0..200 {
            let Value::Object(payload) = json!({"type": "blob", "data": blob}) else { unreachable!() };
            state.channel.broadcast(payload);
            tokio::task::yield_now().await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(9);
        while Arc::strong_count(&conn) > 1 {
            assert!(tokio::time::Instant::now() < deadline, "socket task never exited after termination");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!conn.is_open());
        assert_eq!(state.channel.client_count(), 0);
        assert!(state.channel.drained(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn shutdown_closes_sockets_and_drains() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message as Frame;

        let (addr, state) = serve(r#"listen = "127.0.0.1:0""#).await;
        let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while state.channel.client_count() != 1 {
            assert!(tokio::time::Instant::now() < deadline, "connection never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        state.channel.shutdown();
        assert!(state.channel.drained(Duration::from_secs(3)).await);

        let frame = tokio::time::timeout(Duration::from_secs(2), client.next()).await.unwrap();
        assert!(matches!(frame, Some(Ok(Frame::Close(_)))), "got {frame:?}");
    }
}
