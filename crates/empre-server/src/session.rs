//! A live client connection as the hub sees it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use empre_core::ids::{ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Result of handing a payload to a session's outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The bounded queue is full; the consumer is not keeping up.
    Full,
    /// The session was closed; nothing was written.
    Closed,
}

/// One authenticated connection: identity plus a bounded outbound queue.
///
/// The sender half lives behind a mutex and is dropped on close, so a
/// closed session can never be written to and the writer pump observes the
/// end of the stream.
pub struct ClientSession {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: Mutex<Option<mpsc::Sender<Arc<String>>>>,
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientSession {
    /// Create a session with a queue of `capacity` payloads. The receiver
    /// feeds the connection's writer pump.
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let session = Arc::new(Self {
            id: ConnectionId::new(),
            user_id,
            tx: Mutex::new(Some(tx)),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        });
        (session, rx)
    }

    /// Non-blocking handoff to the outbound queue.
    pub fn send(&self, payload: Arc<String>) -> SendOutcome {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(payload) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Stop accepting payloads. Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.tx
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Total payloads dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record a pong (or any sign of life).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Whether two handles refer to the same connection.
    pub fn same_as(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_in_order() {
        let (session, mut rx) = ClientSession::new(UserId::new(), 8);
        for i in 0..3 {
            assert_eq!(session.send(Arc::new(format!("m{i}"))), SendOutcome::Sent);
        }
        for i in 0..3 {
            assert_eq!(*rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[test]
    fn full_queue_counts_drops() {
        let (session, _rx) = ClientSession::new(UserId::new(), 1);
        assert_eq!(session.send(Arc::new("a".into())), SendOutcome::Sent);
        assert_eq!(session.send(Arc::new("b".into())), SendOutcome::Full);
        assert_eq!(session.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let (session, mut rx) = ClientSession::new(UserId::new(), 4);
        assert_eq!(session.send(Arc::new("last".into())), SendOutcome::Sent);
        assert!(session.close());
        assert!(!session.close());
        assert!(!session.is_open());

        assert_eq!(session.send(Arc::new("late".into())), SendOutcome::Closed);
        assert_eq!(*rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn dropped_receiver_reads_as_closed() {
        let (session, rx) = ClientSession::new(UserId::new(), 4);
        drop(rx);
        assert!(!session.is_open());
        assert_eq!(session.send(Arc::new("x".into())), SendOutcome::Closed);
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (session, _rx) = ClientSession::new(UserId::new(), 1);
        assert!(session.check_alive());
        assert!(!session.check_alive());
        session.mark_alive();
        assert!(session.check_alive());
    }

    #[test]
    fn identity_comparison() {
        let user = UserId::new();
        let (a, _rx_a) = ClientSession::new(user, 1);
        let (b, _rx_b) = ClientSession::new(user, 1);
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
        assert_ne!(a.id, b.id);
    }
}
