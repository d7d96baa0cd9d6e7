//! One relay process: registry, presence, bus and dispatcher wired together.
//!
//! The backend is chosen once, in [`ChatNode::start`]. With a reachable Redis
//! the node runs distributed presence and the shared bus; otherwise it runs
//! local-only for its whole lifetime. Nothing downstream branches on which
//! one was picked.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use relay_core::{OutgoingMessage, RelayError, UserId};
use relay_settings::RelaySettings;
use tracing::{debug, info, warn};

use crate::backend::{RedisBackend, SharedBackend};
use crate::bus::{FanoutBus, LocalBus, SharedBus};
use crate::connection::{ClientConnection, OutboundFrames};
use crate::dispatcher::{DispatchReport, MessageDispatcher};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};
use crate::presence::{DistributedPresence, LocalPresence, PresenceMode, PresenceStore};
use crate::presence_writer::PresenceWriter;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::store::MessageStore;
use crate::subscriber::FanoutSubscriber;

/// A running relay process.
pub struct ChatNode {
    settings: RelaySettings,
    registry: Arc<ConnectionRegistry>,
    presence: Arc<dyn PresenceStore>,
    writer: PresenceWriter,
    dispatcher: MessageDispatcher,
    shutdown: ShutdownCoordinator,
}

impl ChatNode {
    /// Start a node, connecting to Redis if `settings.redis.url` is set.
    ///
    /// A missing URL or failed connection is not an error: the node logs it
    /// and runs local-only.
    pub async fn start(settings: RelaySettings, store: Arc<dyn MessageStore>) -> Self {
        let backend = match settings.redis.url.as_deref() {
            Some(url) => match RedisBackend::connect(url).await {
                Ok(redis) => {
                    info!("connected to redis, running distributed");
                    Some(SharedBackend::new(Arc::new(redis)))
                }
                Err(e) => {
                    warn!(error = %e, "redis unavailable, running local-only");
                    None
                }
            },
            None => {
                info!("no redis url configured, running local-only");
                None
            }
        };
        Self::with_backend(settings, store, backend).await
    }

    /// Start a node over an explicit backend, or local-only with `None`.
    pub async fn with_backend(
        settings: RelaySettings,
        store: Arc<dyn MessageStore>,
        backend: Option<SharedBackend>,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let registry = Arc::new(ConnectionRegistry::new());

        let (presence, bus): (Arc<dyn PresenceStore>, Arc<dyn FanoutBus>) = match backend {
            Some(shared) => {
                let subscriber = FanoutSubscriber::new(
                    shared.pubsub.clone(),
                    registry.clone(),
                    settings.redis.channel.clone(),
                )
                .with_backoff(
                    Duration::from_millis(settings.subscriber.reconnect_base_ms),
                    Duration::from_millis(settings.subscriber.reconnect_max_ms),
                );
                shutdown.track(subscriber.start(shutdown.token()).await);
                (
                    Arc::new(DistributedPresence::new(
                        shared.membership,
                        registry.clone(),
                        settings.redis.presence_key.clone(),
                    )),
                    Arc::new(SharedBus::new(shared.pubsub, settings.redis.channel.clone())),
                )
            }
            None => (
                Arc::new(LocalPresence::new(registry.clone())),
                Arc::new(LocalBus::new(registry.clone())),
            ),
        };

        let (writer, writer_task) = PresenceWriter::spawn(presence.clone(), shutdown.token());
        shutdown.track(writer_task);

        let dispatcher = MessageDispatcher::new(store, registry.clone(), presence.clone(), bus);
        info!(mode = %presence.mode(), "chat node started");

        Self {
            settings,
            registry,
            presence,
            writer,
            dispatcher,
            shutdown,
        }
    }

    /// Register `connection` for `user_id` and mark them online.
    ///
    /// Returns the superseded connection, if any. It is left open; closing it
    /// is up to the caller. When `connection` closes, the user is unregistered
    /// and marked offline unless a newer connection has replaced it by then.
    pub fn attach(
        &self,
        user_id: UserId,
        connection: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        let previous = self.registry.register(user_id.clone(), connection.clone());
        counter!(CONNECTIONS_TOTAL).increment(1);
        if previous.is_none() {
            gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        }
        self.writer.mark_online(user_id.clone());
        info!(%user_id, connection_id = %connection.id, "user connected");

        let registry = self.registry.clone();
        let writer = self.writer.clone();
        let cancel = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            tokio::select! {
                () = connection.closed() => {}
                () = cancel.cancelled() => return,
            }
            if registry.unregister_connection(&user_id, &connection.id) {
                counter!(DISCONNECTIONS_TOTAL, "reason" => "closed").increment(1);
                gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                info!(%user_id, connection_id = %connection.id, "user disconnected");
                writer.mark_offline(user_id).await;
            } else {
                debug!(%user_id, connection_id = %connection.id, "superseded connection closed");
            }
        }));

        previous
    }

    /// Open a connection for `user_id` with the configured buffer and attach it.
    ///
    /// The transport drains the returned receiver; dropping it closes the
    /// connection.
    pub fn connect(&self, user_id: impl Into<UserId>) -> OutboundFrames {
        let (connection, frames) = ClientConnection::channel(self.settings.connection.send_buffer);
        let _ = self.attach(user_id.into(), connection);
        frames
    }

    /// Remove the user from this process and mark them offline.
    ///
    /// Waits for the offline write to be applied. Backend failures are only
    /// logged. Returns whether a connection was registered.
    pub async fn detach(&self, user_id: &UserId) -> bool {
        let removed = self.registry.unregister(user_id).is_some();
        if removed {
            counter!(DISCONNECTIONS_TOTAL, "reason" => "removed").increment(1);
            gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            info!(%user_id, "user removed");
        }
        self.writer.mark_offline(user_id.clone()).await;
        removed
    }

    /// Whether the user is online anywhere.
    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.presence.is_online(user_id).await
    }

    /// Persist and deliver a message. See [`MessageDispatcher::send_message`].
    pub async fn send_message(
        &self,
        outgoing: &OutgoingMessage,
    ) -> Result<DispatchReport, RelayError> {
        self.dispatcher.send_message(outgoing).await
    }

    /// This process's connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Presence implementation picked at startup.
    pub fn mode(&self) -> PresenceMode {
        self.presence.mode()
    }

    /// Settings the node was started with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Stop background tasks, waiting up to `timeout`.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        info!("chat node shutting down");
        self.shutdown.graceful_shutdown(timeout).await;
    }
}
