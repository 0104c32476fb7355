use std::sync::{
    atomic::{AtomicBool, Ordering},
    PoisonError, RwLock,
};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{mpsc::{self, error::TrySendError}, Notify};
use uuid::Uuid;

use crate::{jobs::JobId, metrics::FRAMES_DROPPED};

/// Registry side of one WebSocket session.
///
/// The socket task owns the receiving half of `tx` and waits on the two
/// `Notify` signals; everything here can be touched from any thread.
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    alive: AtomicBool,
    terminated: AtomicBool,
    job_id: RwLock<Option<JobId>>,
    tx: mpsc::Sender<Utf8Bytes>,
    ping: Notify,
    terminate: Notify,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Utf8Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            job_id: RwLock::new(None),
            tx,
            ping: Notify::new(),
            terminate: Notify::new(),
        }
    }

    /// Open until terminated or until the socket task dropped its queue.
    pub fn is_open(&self) -> bool {
        !self.terminated.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.job_id.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn is_subscribed_to(&self, job_id: &JobId) -> bool {
        self.job_id.read().unwrap_or_else(PoisonError::into_inner).as_ref() == Some(job_id)
    }

    /// Last write wins. Returns the job this connection was watching before.
    pub fn subscribe(&self, job_id: JobId) -> Option<JobId> {
        self.job_id.write().unwrap_or_else(PoisonError::into_inner).replace(job_id)
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clears the liveness flag, returning what it was.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Hands a frame to the socket task without waiting.
    pub(crate) fn push(&self, frame: Utf8Bytes) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                FRAMES_DROPPED.inc();
                tracing::warn!(conn_id = %self.id, "Outbound queue is full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn request_ping(&self) {
        self.ping.notify_one();
    }

    pub(crate) async fn ping_requested(&self) {
        self.ping.notified().await
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.terminate.notify_one();
    }

    /// Resolves once `terminate` was called, also when it happened before.
    pub(crate) async fn terminated(&self) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        self.terminate.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribe_is_last_write_wins() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        let first = JobId::new("job-1").unwrap();
        let second = JobId::new("job-2").unwrap();

        assert!(!conn.is_subscribed());
        assert_eq!(conn.subscribe(first.clone()), None);
        assert_eq!(conn.subscribe(second.clone()), Some(first.clone()));
        assert!(conn.is_subscribed_to(&second));
        assert!(!conn.is_subscribed_to(&first));
    }

    #[test]
    fn liveness_flag_round_trip() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        conn.mark_alive();
        assert!(conn.take_alive());
    }

    #[test]
    fn full_or_closed_queue_drops_frames() {
        let (tx, rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        assert!(conn.push(Utf8Bytes::from_static("a")));
        assert!(!conn.push(Utf8Bytes::from_static("b")));
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.push(Utf8Bytes::from_static("c")));
    }

    #[test]
    fn terminate_closes() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        assert!(conn.is_open());
        conn.terminate();
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn terminated_is_sticky() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(tx);
        conn.terminate();
        // The permit is gone now, the flag answers the second wait
        conn.terminated().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.terminated())
            .await
            .expect("terminated resolves after terminate");
    }
}
