//! Shared backend primitives consumed by presence and the fanout bus.
//!
//! Two narrow capabilities, each a trait so the relay never depends on a
//! concrete client:
//!
//! - [`MembershipBackend`]: set membership over a fixed key (`add`, `remove`,
//!   `is_member`)
//! - [`PubSubBackend`]: `publish` a string payload, `subscribe` to a channel
//!
//! [`RedisBackend`] implements both against a real Redis deployment.
//! [`MemoryBackend`] implements both in-process for tests and single-node
//! development, and can simulate an unreachable backend.

pub mod memory;
pub mod redis_backend;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_core::BackendError;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

/// Stream of raw payloads received on a subscribed channel.
///
/// Ends when the underlying subscription is lost.
pub type PayloadStream = BoxStream<'static, String>;

/// Cluster-wide set membership.
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    /// Add `member` to the set at `key`.
    async fn add(&self, key: &str, member: &str) -> Result<(), BackendError>;

    /// Remove `member` from the set at `key`. Absent members are not an error.
    async fn remove(&self, key: &str, member: &str) -> Result<(), BackendError>;

    /// Whether `member` is in the set at `key`.
    async fn is_member(&self, key: &str, member: &str) -> Result<bool, BackendError>;
}

/// Cluster-wide publish/subscribe.
#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Publish `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError>;

    /// Open a subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BackendError>;
}

/// Both shared capabilities, backed by one deployment.
#[derive(Clone)]
pub struct SharedBackend {
    /// Presence set access.
    pub membership: Arc<dyn MembershipBackend>,
    /// Fanout channel access.
    pub pubsub: Arc<dyn PubSubBackend>,
}

impl SharedBackend {
    /// Use one backend for both capabilities.
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: MembershipBackend + PubSubBackend + 'static,
    {
        Self {
            membership: backend.clone(),
            pubsub: backend,
        }
    }
}
