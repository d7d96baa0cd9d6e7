//! Presence: "is this user connected anywhere in the cluster?"
//!
//! [`PresenceStore`] has two implementations, picked once when the node
//! starts. Call sites never check which one they hold.
//!
//! - [`DistributedPresence`] keeps a shared membership set under one key.
//! - [`LocalPresence`] answers from this process's registry alone.
//!
//! Both answer `true` for a user with a local connection, whatever the shared
//! backend says.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use relay_core::{BackendError, UserId};
use tracing::warn;

use crate::backend::MembershipBackend;
use crate::metrics::PRESENCE_FALLBACKS_TOTAL;
use crate::registry::ConnectionRegistry;

/// Which presence implementation a node runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceMode {
    /// Shared membership set visible to every process.
    Distributed,
    /// Only this process's connections are visible.
    LocalOnly,
}

impl fmt::Display for PresenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Distributed => write!(f, "distributed"),
            Self::LocalOnly => write!(f, "local_only"),
        }
    }
}

/// Cluster-wide online/offline view.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record the user as online.
    async fn mark_online(&self, user_id: &UserId) -> Result<(), BackendError>;

    /// Record the user as offline.
    async fn mark_offline(&self, user_id: &UserId) -> Result<(), BackendError>;

    /// Whether the user is online. Never fails: backend errors degrade to the
    /// local view.
    async fn is_online(&self, user_id: &UserId) -> bool;

    /// Which implementation this is.
    fn mode(&self) -> PresenceMode;
}

/// Presence backed by a shared membership set.
pub struct DistributedPresence {
    backend: Arc<dyn MembershipBackend>,
    registry: Arc<ConnectionRegistry>,
    key: String,
}

impl DistributedPresence {
    /// Presence over the set at `key`.
    pub fn new(
        backend: Arc<dyn MembershipBackend>,
        registry: Arc<ConnectionRegistry>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            key: key.into(),
        }
    }
}

#[async_trait]
impl PresenceStore for DistributedPresence {
    async fn mark_online(&self, user_id: &UserId) -> Result<(), BackendError> {
        self.backend.add(&self.key, user_id).await
    }

    async fn mark_offline(&self, user_id: &UserId) -> Result<(), BackendError> {
        self.backend.remove(&self.key, user_id).await
    }

    async fn is_online(&self, user_id: &UserId) -> bool {
        if self.registry.contains(user_id) {
            return true;
        }
        match self.backend.is_member(&self.key, user_id).await {
            Ok(online) => online,
            Err(e) => {
                warn!(%user_id, error = %e, "presence lookup failed, using local view");
                counter!(PRESENCE_FALLBACKS_TOTAL).increment(1);
                self.registry.contains(user_id)
            }
        }
    }

    fn mode(&self) -> PresenceMode {
        PresenceMode::Distributed
    }
}

/// Presence limited to this process.
pub struct LocalPresence {
    registry: Arc<ConnectionRegistry>,
}

impl LocalPresence {
    /// Presence answered from `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PresenceStore for LocalPresence {
    async fn mark_online(&self, _user_id: &UserId) -> Result<(), BackendError> {
        Ok(())
    }

    async fn mark_offline(&self, _user_id: &UserId) -> Result<(), BackendError> {
        Ok(())
    }

    async fn is_online(&self, user_id: &UserId) -> bool {
        self.registry.contains(user_id)
    }

    fn mode(&self) -> PresenceMode {
        PresenceMode::LocalOnly
    }
}
