//! Live client connection handle.
//!
//! A [`ClientConnection`] is the process-local capability to write to one
//! user's socket. The transport owns the other end of the channel: it drains
//! the receiver into the socket, and dropping the receiver is the connection's
//! "closed" notification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::{ClientNotification, ConnectionId, DeliveryError, RelayError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receiving end handed to the transport's write task.
pub type OutboundFrames = mpsc::Receiver<Arc<String>>;

/// One live connection accepted by this process.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the transport's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Count of frames dropped because the channel was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Wrap an existing send channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh ID and a `buffer`-deep channel.
    pub fn channel(buffer: usize) -> (Arc<Self>, OutboundFrames) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Arc::new(Self::new(ConnectionId::generate(), tx)), rx)
    }

    /// Queue a serialized frame for the client.
    ///
    /// Never waits: a full buffer is reported as [`DeliveryError::Full`].
    pub fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Full {
                    connection_id: self.id.clone(),
                })
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Closed {
                    connection_id: self.id.clone(),
                })
            }
        }
    }

    /// Serialize a notification and queue it.
    pub fn send_notification(&self, notification: &ClientNotification) -> Result<(), RelayError> {
        let json = notification.to_json()?;
        self.send(Arc::new(json))?;
        Ok(())
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Whether the transport has released its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the transport releases its end of the channel.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use relay_core::{MessageRecord, MessageSender, MessageType};
    use std::time::Duration;

    fn record() -> MessageRecord {
        MessageRecord {
            id: "m1".into(),
            message_type: MessageType::Text,
            chat_id: "c1".into(),
            sender_id: "u1".into(),
            text: "hi".into(),
            created_at: Utc::now(),
            sender: MessageSender {
                id: "u1".into(),
                name: "Alice".into(),
            },
        }
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = ClientConnection::channel(32);
        conn.send(Arc::new("hello".into())).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_fails() {
        let (conn, rx) = ClientConnection::channel(32);
        drop(rx);
        let err = conn.send(Arc::new("hello".into())).unwrap_err();
        assert_matches!(err, DeliveryError::Closed { .. });
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_fails() {
        let (conn, _rx) = ClientConnection::channel(1);
        assert!(conn.send(Arc::new("msg1".into())).is_ok());
        let err = conn.send(Arc::new("msg2".into())).unwrap_err();
        assert_matches!(err, DeliveryError::Full { .. });
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn notification_is_serialized() {
        let (conn, mut rx) = ClientConnection::channel(4);
        conn.send_notification(&ClientNotification::new_message(record()))
            .unwrap();
        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "new_message");
        assert_eq!(parsed["newMessage"]["id"], "m1");
    }

    #[tokio::test]
    async fn closed_resolves_when_receiver_dropped() {
        let (conn, rx) = ClientConnection::channel(4);
        assert!(!conn.is_closed());
        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (conn, mut rx) = ClientConnection::channel(8);
        for i in 0..5 {
            conn.send(Arc::new(format!("msg_{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("msg_{i}"));
        }
    }

    #[test]
    fn zero_buffer_is_clamped() {
        let (conn, _rx) = ClientConnection::channel(0);
        assert!(conn.send(Arc::new("x".into())).is_ok());
    }
}
