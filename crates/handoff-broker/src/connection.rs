//! Per-connection send handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use handoff_core::ConnectionId;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::events::encode;

/// Which side of the hand-off a connection belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// End user.
    Customer,
    /// Human support agent.
    Agent,
}

impl ConnectionRole {
    /// Lowercase name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No live connection is attached.
    #[error("not connected")]
    NotConnected,
    /// The connection's send queue is full.
    #[error("send queue full")]
    QueueFull,
    /// The event could not be serialized.
    #[error("event could not be encoded")]
    Encoding,
}

/// A connected WebSocket client as seen by the broker.
///
/// Frames go into a bounded queue drained by the connection's writer task.
/// Sends never block.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Customer or agent.
    pub role: ConnectionRole,
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped: AtomicU64,
    close: CancellationToken,
}

impl ClientConnection {
    /// Create a connection handle around the writer's queue.
    pub fn new(id: ConnectionId, role: ConnectionRole, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            role,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped: AtomicU64::new(0),
            close: CancellationToken::new(),
        }
    }

    /// Queue a text frame.
    pub fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(handoff_core::metrics::DELIVERY_DROPS_TOTAL, "role" => self.role.as_str())
                    .increment(1);
                match e {
                    TrySendError::Full(_) => Err(DeliveryError::QueueFull),
                    TrySendError::Closed(_) => Err(DeliveryError::NotConnected),
                }
            }
        }
    }

    /// Serialize an event and queue it.
    pub fn send_event<T: Serialize>(&self, event: &T) -> Result<(), DeliveryError> {
        let json = encode(event).ok_or(DeliveryError::Encoding)?;
        self.send(Arc::new(json))
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record a pong (or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the transport to close this connection.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    /// Whether a close was requested.
    pub fn is_close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Token cancelled when a close is requested.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::connection;
    use super::*;
    use crate::events::CustomerEvent;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn send_event_queues_json() {
        let (conn, mut rx) = connection("conn_1", ConnectionRole::Customer);
        conn.send_event(&CustomerEvent::AgentLeft).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, r#"{"type":"agent-left"}"#);
    }

    #[test]
    fn full_queue_reports_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from("c"), ConnectionRole::Agent, tx);
        assert!(conn.send(Arc::new("a".into())).is_ok());
        assert_eq!(conn.send(Arc::new("b".into())), Err(DeliveryError::QueueFull));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_is_not_connected() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let conn = ClientConnection::new(ConnectionId::from("c"), ConnectionRole::Agent, tx);
        assert_eq!(
            conn.send(Arc::new("a".into())),
            Err(DeliveryError::NotConnected)
        );
    }

    #[test]
    fn unencodable_event_is_an_error() {
        let (conn, mut rx) = connection("conn_1", ConnectionRole::Agent);
        let mut bad = BTreeMap::new();
        let _ = bad.insert(vec![1_u8], 1_u8);
        assert_eq!(conn.send_event(&bad), Err(DeliveryError::Encoding));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = connection("conn_1", ConnectionRole::Agent);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn request_close_cancels_token() {
        let (conn, _rx) = connection("conn_1", ConnectionRole::Customer);
        let token = conn.close_token();
        assert!(!conn.is_close_requested());
        conn.request_close();
        assert!(token.is_cancelled());
        assert!(conn.is_close_requested());
    }
}
