//! Fanout bus publisher.
//!
//! [`SharedBus`] publishes envelopes on the cluster channel, where every
//! process's [`FanoutSubscriber`](crate::subscriber::FanoutSubscriber) picks
//! them up. [`LocalBus`] is the local-only stand-in: it hands the envelope
//! straight to this process's registry.
//!
//! In local-only mode the dispatcher reaches [`LocalBus`] only when the
//! receiver registered between its registry lookup and its presence check.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use relay_core::{ChatEnvelope, RelayError};
use tracing::debug;

use crate::backend::PubSubBackend;
use crate::metrics::BUS_PUBLISHES_TOTAL;
use crate::registry::ConnectionRegistry;
use crate::subscriber::deliver_envelope;

/// Publisher side of the fanout bus.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Hand `envelope` to whichever process holds the receiver.
    ///
    /// Fire-and-forget: success means the bus accepted it, not that anyone
    /// received it.
    async fn publish(&self, envelope: &ChatEnvelope) -> Result<(), RelayError>;
}

/// Bus over a shared pub/sub channel.
pub struct SharedBus {
    pubsub: Arc<dyn PubSubBackend>,
    channel: String,
}

impl SharedBus {
    /// Publisher for `channel`.
    pub fn new(pubsub: Arc<dyn PubSubBackend>, channel: impl Into<String>) -> Self {
        Self {
            pubsub,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl FanoutBus for SharedBus {
    async fn publish(&self, envelope: &ChatEnvelope) -> Result<(), RelayError> {
        let payload = envelope.to_json()?;
        self.pubsub.publish(&self.channel, payload).await?;
        counter!(BUS_PUBLISHES_TOTAL).increment(1);
        debug!(
            channel = %self.channel,
            receiver_id = %envelope.receiver_id,
            message_id = %envelope.new_message.id,
            "envelope published"
        );
        Ok(())
    }
}

/// Loopback bus for a process running without a shared backend.
///
/// Covers a receiver that registered after the dispatcher's local lookup
/// missed it; otherwise local presence has already answered offline.
pub struct LocalBus {
    registry: Arc<ConnectionRegistry>,
}

impl LocalBus {
    /// Loopback into `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl FanoutBus for LocalBus {
    async fn publish(&self, envelope: &ChatEnvelope) -> Result<(), RelayError> {
        let payload = envelope.to_json()?;
        let outcome = deliver_envelope(&self.registry, &payload);
        debug!(receiver_id = %envelope.receiver_id, ?outcome, "envelope looped back");
        Ok(())
    }
}
