//! Message dispatch: persist, echo, route.
//!
//! [`MessageDispatcher::send_message`] runs one strict sequence with no
//! retries:
//!
//! 1. Persist through the [`MessageStore`]. A failure aborts the send and is
//!    the only error ever returned.
//! 2. Echo the stored record to the sender's local connection.
//! 3. Route to the receiver: directly if this process holds their connection,
//!    through the fanout bus if presence reports them online elsewhere, not at
//!    all if they are offline.
//!
//! Everything after step 1 is best effort and only logged. Sending the same
//! message twice persists and delivers it twice.

use std::sync::Arc;

use metrics::counter;
use relay_core::{
    ChatEnvelope, ClientNotification, DeliveryError, MessageRecord, OutgoingMessage, RelayError,
};
use tracing::{debug, instrument, warn};

use crate::bus::FanoutBus;
use crate::metrics::{BUS_PUBLISH_ERRORS_TOTAL, LOCAL_DELIVERIES_TOTAL, MESSAGES_SENT_TOTAL};
use crate::presence::PresenceStore;
use crate::registry::{ConnectionRegistry, LocalDelivery};
use crate::store::MessageStore;

/// How the receiver was reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverDelivery {
    /// Written to the receiver's connection on this process.
    Local,
    /// The receiver's local connection rejected the write. Nothing published.
    LocalFailed(DeliveryError),
    /// Published on the fanout bus for another process to deliver.
    Published,
    /// Publishing failed; the receiver gets nothing.
    PublishFailed,
    /// The receiver is offline; nothing pushed.
    Offline,
    /// Sender and receiver are the same user; the echo covers it.
    SameAsSender,
}

/// Result of a successful send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    /// The persisted message.
    pub message: MessageRecord,
    /// Whether the sender's local connection got the echo.
    pub echoed: bool,
    /// What happened on the receiver side.
    pub receiver: ReceiverDelivery,
}

/// Runs the send sequence against one process's collaborators.
pub struct MessageDispatcher {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    presence: Arc<dyn PresenceStore>,
    bus: Arc<dyn FanoutBus>,
}

impl MessageDispatcher {
    /// Wire a dispatcher.
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        presence: Arc<dyn PresenceStore>,
        bus: Arc<dyn FanoutBus>,
    ) -> Self {
        Self {
            store,
            registry,
            presence,
            bus,
        }
    }

    /// Persist `outgoing` and deliver it.
    ///
    /// Only a persistence failure is returned; in that case nothing was
    /// delivered or published.
    #[instrument(
        skip(self, outgoing),
        fields(
            chat_id = %outgoing.chat_id,
            user_id = %outgoing.user_id,
            receiver_id = %outgoing.receiver_id
        )
    )]
    pub async fn send_message(
        &self,
        outgoing: &OutgoingMessage,
    ) -> Result<DispatchReport, RelayError> {
        let message = self
            .store
            .create_message(&outgoing.chat_id, &outgoing.user_id, &outgoing.text)
            .await?;
        counter!(MESSAGES_SENT_TOTAL).increment(1);
        debug!(message_id = %message.id, "message persisted");

        let frame = Arc::new(ClientNotification::new_message(message.clone()).to_json()?);

        let echoed = match self.registry.deliver(&outgoing.user_id, &frame) {
            LocalDelivery::Delivered => {
                counter!(LOCAL_DELIVERIES_TOTAL, "kind" => "echo").increment(1);
                true
            }
            LocalDelivery::NotConnected => false,
            LocalDelivery::Failed(e) => {
                warn!(message_id = %message.id, error = %e, "echo to sender failed");
                false
            }
        };

        let receiver = if outgoing.receiver_id == outgoing.user_id {
            ReceiverDelivery::SameAsSender
        } else {
            self.route(outgoing, &message, &frame).await
        };

        debug!(message_id = %message.id, echoed, ?receiver, "message dispatched");
        Ok(DispatchReport {
            message,
            echoed,
            receiver,
        })
    }

    async fn route(
        &self,
        outgoing: &OutgoingMessage,
        message: &MessageRecord,
        frame: &Arc<String>,
    ) -> ReceiverDelivery {
        match self.registry.deliver(&outgoing.receiver_id, frame) {
            LocalDelivery::Delivered => {
                counter!(LOCAL_DELIVERIES_TOTAL, "kind" => "receiver").increment(1);
                return ReceiverDelivery::Local;
            }
            LocalDelivery::Failed(e) => {
                warn!(message_id = %message.id, error = %e, "local delivery to receiver failed");
                return ReceiverDelivery::LocalFailed(e);
            }
            LocalDelivery::NotConnected => {}
        }

        if !self.presence.is_online(&outgoing.receiver_id).await {
            debug!(message_id = %message.id, "receiver offline, nothing pushed");
            return ReceiverDelivery::Offline;
        }

        let envelope = ChatEnvelope::new(
            outgoing.receiver_id.clone(),
            outgoing.user_id.clone(),
            message.clone(),
        );
        match self.bus.publish(&envelope).await {
            Ok(()) => ReceiverDelivery::Published,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "fanout publish failed");
                counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
                ReceiverDelivery::PublishFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MembershipBackend, MemoryBackend, PubSubBackend};
    use crate::bus::{LocalBus, SharedBus};
    use crate::connection::{ClientConnection, OutboundFrames};
    use crate::presence::{DistributedPresence, LocalPresence};
    use crate::store::MemoryMessageStore;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use std::time::Duration;

    struct Harness {
        dispatcher: MessageDispatcher,
        store: Arc<MemoryMessageStore>,
        registry: Arc<ConnectionRegistry>,
        backend: Arc<MemoryBackend>,
    }

    fn distributed() -> Harness {
        let store = Arc::new(MemoryMessageStore::new().with_user("u1", "Alice"));
        let registry = Arc::new(ConnectionRegistry::new());
        let backend = Arc::new(MemoryBackend::new());
        let presence = Arc::new(DistributedPresence::new(
            backend.clone(),
            registry.clone(),
            "online-users",
        ));
        let bus = Arc::new(SharedBus::new(backend.clone(), "chat-messages"));
        let dispatcher = MessageDispatcher::new(store.clone(), registry.clone(), presence, bus);
        Harness {
            dispatcher,
            store,
            registry,
            backend,
        }
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> OutboundFrames {
        let (conn, rx) = ClientConnection::channel(8);
        let _ = registry.register(user.into(), conn);
        rx
    }

    fn hi() -> OutgoingMessage {
        OutgoingMessage::new("c1", "u1", "u2", "hi")
    }

    #[tokio::test]
    async fn local_receiver_gets_one_notification_and_nothing_is_published() {
        let h = distributed();
        let mut sender_rx = connect(&h.registry, "u1");
        let mut receiver_rx = connect(&h.registry, "u2");

        let report = h.dispatcher.send_message(&hi()).await.unwrap();

        assert_eq!(report.receiver, ReceiverDelivery::Local);
        assert!(report.echoed);
        assert_eq!(report.message.id.as_str(), "m1");
        assert!(receiver_rx.try_recv().is_ok());
        assert!(receiver_rx.try_recv().is_err());
        assert!(sender_rx.try_recv().is_ok());
        assert_eq!(h.backend.publish_count(), 0);
    }

    #[tokio::test]
    async fn remote_receiver_is_published_once() {
        let h = distributed();
        let mut stream = h.backend.subscribe("chat-messages").await.unwrap();
        h.backend.add("online-users", "u2").await.unwrap();

        let report = h.dispatcher.send_message(&hi()).await.unwrap();

        assert_eq!(report.receiver, ReceiverDelivery::Published);
        assert_eq!(h.backend.publish_count(), 1);
        let payload = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        let envelope = ChatEnvelope::from_json(&payload).unwrap();
        assert_eq!(envelope.receiver_id.as_str(), "u2");
        assert_eq!(envelope.user_id.as_str(), "u1");
        assert_eq!(envelope.new_message.text, "hi");
    }

    #[tokio::test]
    async fn offline_receiver_gets_nothing() {
        let h = distributed();
        let report = h.dispatcher.send_message(&hi()).await.unwrap();
        assert_eq!(report.receiver, ReceiverDelivery::Offline);
        assert!(!report.echoed);
        assert_eq!(h.backend.publish_count(), 0);
        assert_eq!(h.store.messages().len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_delivers_nothing() {
        let h = distributed();
        let mut sender_rx = connect(&h.registry, "u1");
        let mut receiver_rx = connect(&h.registry, "u2");
        h.store.set_failing(true);

        let err = h.dispatcher.send_message(&hi()).await.unwrap_err();

        assert_matches!(err, RelayError::Store(_));
        assert!(err.is_fatal());
        assert!(sender_rx.try_recv().is_err());
        assert!(receiver_rx.try_recv().is_err());
        assert_eq!(h.backend.publish_count(), 0);
    }

    #[tokio::test]
    async fn failed_echo_does_not_abort() {
        let h = distributed();
        let sender_rx = connect(&h.registry, "u1");
        let mut receiver_rx = connect(&h.registry, "u2");
        drop(sender_rx);

        let report = h.dispatcher.send_message(&hi()).await.unwrap();

        assert!(!report.echoed);
        assert_eq!(report.receiver, ReceiverDelivery::Local);
        assert!(receiver_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn failed_local_write_is_not_published() {
        let h = distributed();
        let receiver_rx = connect(&h.registry, "u2");
        drop(receiver_rx);

        let report = h.dispatcher.send_message(&hi()).await.unwrap();

        assert_matches!(
            report.receiver,
            ReceiverDelivery::LocalFailed(DeliveryError::Closed { .. })
        );
        assert_eq!(h.backend.publish_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_offline() {
        let h = distributed();
        h.backend.set_reachable(false);
        let mut sender_rx = connect(&h.registry, "u1");

        let report = h.dispatcher.send_message(&hi()).await.unwrap();

        assert!(report.echoed);
        assert!(sender_rx.try_recv().is_ok());
        assert_eq!(report.receiver, ReceiverDelivery::Offline);
    }

    #[tokio::test]
    async fn publish_failure_is_logged_not_returned() {
        let store = Arc::new(MemoryMessageStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let presence_backend = Arc::new(MemoryBackend::new());
        presence_backend.add("online-users", "u2").await.unwrap();
        let bus_backend = Arc::new(MemoryBackend::new());
        bus_backend.set_reachable(false);
        let dispatcher = MessageDispatcher::new(
            store,
            registry.clone(),
            Arc::new(DistributedPresence::new(
                presence_backend,
                registry,
                "online-users",
            )),
            Arc::new(SharedBus::new(bus_backend, "chat-messages")),
        );

        let report = dispatcher.send_message(&hi()).await.unwrap();
        assert_eq!(report.receiver, ReceiverDelivery::PublishFailed);
    }

    #[tokio::test]
    async fn message_to_self_is_echoed_once() {
        let h = distributed();
        let mut rx = connect(&h.registry, "u1");

        let report = h
            .dispatcher
            .send_message(&OutgoingMessage::new("c1", "u1", "u1", "note"))
            .await
            .unwrap();

        assert_eq!(report.receiver, ReceiverDelivery::SameAsSender);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sends_are_not_deduplicated() {
        let h = distributed();
        let mut receiver_rx = connect(&h.registry, "u2");

        let first = h.dispatcher.send_message(&hi()).await.unwrap();
        let second = h.dispatcher.send_message(&hi()).await.unwrap();

        assert_ne!(first.message.id, second.message.id);
        assert!(receiver_rx.try_recv().is_ok());
        assert!(receiver_rx.try_recv().is_ok());
        assert_eq!(h.store.messages().len(), 2);
    }

    #[tokio::test]
    async fn local_only_mode_routes_through_registry() {
        let store = Arc::new(MemoryMessageStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = MessageDispatcher::new(
            store,
            registry.clone(),
            Arc::new(LocalPresence::new(registry.clone())),
            Arc::new(LocalBus::new(registry.clone())),
        );
        let mut receiver_rx = connect(&registry, "u2");

        let report = dispatcher.send_message(&hi()).await.unwrap();
        assert_eq!(report.receiver, ReceiverDelivery::Local);
        assert!(receiver_rx.try_recv().is_ok());

        let _ = registry.unregister("u2");
        let report = dispatcher.send_message(&hi()).await.unwrap();
        assert_eq!(report.receiver, ReceiverDelivery::Offline);
    }

    #[tokio::test]
    async fn notification_shape() {
        let h = distributed();
        let mut receiver_rx = connect(&h.registry, "u2");
        let _ = h.dispatcher.send_message(&hi()).await.unwrap();

        let frame = receiver_rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "new_message");
        assert_eq!(value["newMessage"]["id"], "m1");
        assert_eq!(value["newMessage"]["chatId"], "c1");
        assert_eq!(value["newMessage"]["sender"]["name"], "Alice");
    }
}
