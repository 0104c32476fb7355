//! Job-scoped notification channel.
//!
//! Browsers connect over WebSocket and subscribe to one job id at a time.
//! Producers push events with [`JobChannel::send_to_job`] (only connections
//! watching that job get them) or [`JobChannel::broadcast`] (everyone).
//! Delivery is fire-and-forget: nothing is queued for absent subscribers.

mod connection;
mod handler;
mod types;

pub use connection::Connection;
pub use types::*;

use std::{
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};

use axum::{routing::get, Router};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::{sync::watch, task::AbortHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    jobs::JobId,
    metrics::{FRAMES_SENT, HEARTBEAT_EVICTIONS},
    state::AppState,
    DEFAULT_HEARTBEAT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WS_PATH,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Upgrade path
    pub path: String,
    pub heartbeat_interval: Duration,
    /// Per-connection outbound queue, frames beyond it are dropped
    pub queue_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_WS_PATH.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub struct JobChannel {
    settings: ChannelSettings,
    /// Registry of upgraded connections, scanned on every relay
    connections: DashMap<Uuid, Arc<Connection>>,
    /// Set once by `initialize`
    heartbeat: OnceLock<AbortHandle>,
    /// Running socket tasks, evicted ones included until they exit
    sockets: watch::Sender<usize>,
}

impl JobChannel {
    pub fn new(mut settings: ChannelSettings) -> Arc<Self> {
        if settings.heartbeat_interval.is_zero() {
            tracing::warn!("Heartbeat interval can't be zero, using {:?}", DEFAULT_HEARTBEAT);
            settings.heartbeat_interval = DEFAULT_HEARTBEAT;
        }
        settings.queue_capacity = settings.queue_capacity.max(1);
        Arc::new(Self {
            settings,
            connections: DashMap::new(),
            heartbeat: OnceLock::new(),
            sockets: watch::Sender::new(0),
        })
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Starts the heartbeat and returns the upgrade route for the host server.
    ///
    /// Must run inside a tokio runtime. Call it once: later calls only return
    /// the route again.
    pub fn initialize(self: &Arc<Self>) -> Router<AppState> {
        if self.is_initialized() {
            tracing::warn!("Job channel is already initialized, heartbeat is not restarted");
        } else {
            let handle = tokio::spawn(heartbeat(Arc::downgrade(self), self.settings.heartbeat_interval)).abort_handle();
            if let Err(handle) = self.heartbeat.set(handle) {
                handle.abort();
            } else {
                tracing::info!(
                    path = %self.settings.path,
                    interval = ?self.settings.heartbeat_interval,
                    "Job channel initialized"
                );
            }
        }
        Router::new().route(&self.settings.path, get(handler::initial))
    }

    pub fn is_initialized(&self) -> bool {
        self.heartbeat.get().is_some()
    }

    pub(crate) fn register(&self, conn: Arc<Connection>) {
        self.connections.insert(conn.id, conn);
    }

    pub(crate) fn unregister(&self, id: &Uuid) {
        self.connections.remove(id);
    }

    /// Number of open connections, 0 before `initialize`.
    pub fn client_count(&self) -> usize {
        if !self.is_initialized() {
            return 0;
        }
        self.connections.len()
    }

    /// Relays `{...payload, jobId, timestamp}` to every open connection
    /// subscribed to `job_id` and returns how many got it.
    pub fn send_to_job(&self, job_id: &JobId, payload: Map<String, Value>) -> usize {
        if !self.is_initialized() {
            tracing::warn!(%job_id, "Job channel is not initialized, event dropped");
            return 0;
        }
        let frame = match event_frame(payload, Some(job_id)) {
            Ok(frame) => frame,
            Err(kind) => {
                tracing::warn!(%job_id, error = %kind, "Failed to serialize job event");
                return 0;
            }
        };

        let total = self.connections.len();
        let (mut open, mut subscribed, mut matching, mut sent) = (0usize, 0usize, 0usize, 0usize);
        for entry in self.connections.iter() {
            let conn = entry.value();
            if !conn.is_open() {
                continue;
            }
            open += 1;
            if !conn.is_subscribed() {
                continue;
            }
            subscribed += 1;
            if !conn.is_subscribed_to(job_id) {
                continue;
            }
            matching += 1;
            if conn.push(frame.clone()) {
                sent += 1;
            }
        }
        FRAMES_SENT.with_label_values(&["job"]).inc_by(sent as u64);

        tracing::debug!(%job_id, total, open, subscribed, matching, sent, "Job event relayed");
        if sent == 0 {
            tracing::warn!(%job_id, open, "Job event had no recipient");
        }
        sent
    }

    /// Relays `{...payload, timestamp}` to every open connection.
    pub fn broadcast(&self, payload: Map<String, Value>) -> usize {
        if !self.is_initialized() {
            tracing::warn!("Job channel is not initialized, broadcast dropped");
            return 0;
        }
        let frame = match event_frame(payload, None) {
            Ok(frame) => frame,
            Err(kind) => {
                tracing::warn!(error = %kind, "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut sent = 0usize;
        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.is_open() && conn.push(frame.clone()) {
                sent += 1;
            }
        }
        FRAMES_SENT.with_label_values(&["broadcast"]).inc_by(sent as u64);

        tracing::debug!(total = self.connections.len(), sent, "Broadcast relayed");
        sent
    }

    /// One heartbeat round: terminates connections that didn't answer the
    /// previous ping, then clears the flag and pings the rest.
    /// Returns the number of evicted connections.
    pub fn sweep(&self) -> usize {
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.take_alive() {
                conn.request_ping();
            } else {
                dead.push(conn.id);
            }
        }

        let mut evicted = 0;
        for id in dead {
            if let Some((_, conn)) = self.connections.remove(&id) {
                conn.terminate();
                evicted += 1;
                tracing::info!(conn_id = %id, job_id = ?conn.job_id(), "Heartbeat timeout, connection terminated");
            }
        }
        HEARTBEAT_EVICTIONS.inc_by(evicted as u64);
        evicted
    }

    pub(crate) fn track_socket(self: &Arc<Self>) -> SocketGuard {
        self.sockets.send_modify(|count| *count += 1);
        SocketGuard(Arc::clone(self))
    }

    /// Waits until every socket task has exited. `false` if `timeout` ran out first.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let mut sockets = self.sockets.subscribe();
        matches!(tokio::time::timeout(timeout, sockets.wait_for(|count| *count == 0)).await, Ok(Ok(_)))
    }

    /// Stops the heartbeat and closes every connection.
    pub fn shutdown(&self) {
        if let Some(handle) = self.heartbeat.get() {
            handle.abort();
        }
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            if let Some((_, conn)) = self.connections.remove(id) {
                conn.terminate();
            }
        }
        tracing::info!(closed = ids.len(), "Job channel shut down");
    }
}

/// Held by a socket task for its whole life.
pub(crate) struct SocketGuard(Arc<JobChannel>);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.0.sockets.send_modify(|count| *count = count.saturating_sub(1));
    }
}

async fn heartbeat(channel: Weak<JobChannel>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(channel) = channel.upgrade() else {
            tracing::debug!("Job channel dropped, heartbeat stopped");
            return;
        };
        let evicted = channel.sweep();
        tracing::trace!(evicted, clients = channel.client_count(), "Heartbeat");
    }
}
