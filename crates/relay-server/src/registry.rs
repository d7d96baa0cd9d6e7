//! Per-process connection registry.
//!
//! Maps a user ID to the one live connection this process holds for that
//! user. It is the ground truth for "can I deliver locally right now": the
//! local presence view, the dispatcher and the fanout subscriber all read it.
//!
//! The lock is held only for the map operation itself and never across an
//! `.await`, so every method here is synchronous and cannot fail.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_core::{ConnectionId, DeliveryError, UserId};
use tracing::debug;

use crate::connection::ClientConnection;

/// Outcome of writing a frame to a user's local connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDelivery {
    /// Queued on the user's connection.
    Delivered,
    /// This process holds no connection for the user.
    NotConnected,
    /// The connection exists but the write failed.
    Failed(DeliveryError),
}

/// Live connections on this process, indexed by user.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` for `user_id`, replacing any previous one.
    ///
    /// The superseded connection is returned untouched; the registry never
    /// closes it.
    pub fn register(
        &self,
        user_id: UserId,
        connection: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        let previous = self.connections.write().insert(user_id.clone(), connection);
        if let Some(ref old) = previous {
            debug!(%user_id, superseded = %old.id, "connection superseded");
        }
        previous
    }

    /// Remove the user's connection, if any.
    pub fn unregister(&self, user_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(user_id)
    }

    /// Remove the user's entry only if it is still `connection_id`.
    ///
    /// Returns `true` if an entry was removed. A superseded connection closing
    /// late therefore never evicts its replacement.
    pub fn unregister_connection(&self, user_id: &str, connection_id: &ConnectionId) -> bool {
        let mut conns = self.connections.write();
        match conns.get(user_id) {
            Some(current) if current.id == *connection_id => {
                let _ = conns.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// The user's current connection on this process.
    pub fn lookup(&self, user_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(user_id).cloned()
    }

    /// Whether this process holds a connection for the user.
    pub fn contains(&self, user_id: &str) -> bool {
        self.connections.read().contains_key(user_id)
    }

    /// Queue `frame` on the user's connection.
    pub fn deliver(&self, user_id: &str, frame: &Arc<String>) -> LocalDelivery {
        let Some(conn) = self.lookup(user_id) else {
            return LocalDelivery::NotConnected;
        };
        match conn.send(Arc::clone(frame)) {
            Ok(()) => LocalDelivery::Delivered,
            Err(e) => LocalDelivery::Failed(e),
        }
    }

    /// Number of registered users.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no user is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn users(&self) -> Vec<UserId> {
        self.connections.read().keys().cloned().collect()
    }
}
