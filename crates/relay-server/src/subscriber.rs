//! Fanout bus subscriber.
//!
//! One long-lived subscription per process on the chat channel. Each envelope
//! is delivered if this process holds the receiver's connection and dropped
//! otherwise. Nothing is acknowledged, retried, or dead-lettered.
//!
//! If the subscription ends or cannot be opened, the subscriber reconnects
//! with exponential backoff until shutdown. Envelopes published while it is
//! away are lost.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use relay_core::{ChatEnvelope, ClientNotification, DeliveryError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{PayloadStream, PubSubBackend};
use crate::metrics::{BUS_DELIVERIES_TOTAL, BUS_DROPS_TOTAL};
use crate::registry::{ConnectionRegistry, LocalDelivery};

/// What happened to one payload taken off the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// Written to the receiver's local connection.
    Delivered,
    /// The receiver is not connected to this process.
    NotHere,
    /// The payload was not a valid envelope.
    Malformed,
    /// The receiver's connection rejected the write.
    Failed(DeliveryError),
}

/// Route one raw bus payload to the local registry.
pub fn deliver_envelope(registry: &ConnectionRegistry, payload: &str) -> EnvelopeOutcome {
    let envelope = match ChatEnvelope::from_json(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping malformed envelope");
            counter!(BUS_DROPS_TOTAL, "reason" => "malformed").increment(1);
            return EnvelopeOutcome::Malformed;
        }
    };
    let receiver_id = envelope.receiver_id.clone();
    let message_id = envelope.new_message.id.clone();
    let frame = match ClientNotification::from(envelope).to_json() {
        Ok(json) => Arc::new(json),
        Err(e) => {
            warn!(%receiver_id, error = %e, "failed to encode notification");
            counter!(BUS_DROPS_TOTAL, "reason" => "codec").increment(1);
            return EnvelopeOutcome::Malformed;
        }
    };

    match registry.deliver(&receiver_id, &frame) {
        LocalDelivery::Delivered => {
            debug!(%receiver_id, %message_id, "envelope delivered");
            counter!(BUS_DELIVERIES_TOTAL).increment(1);
            EnvelopeOutcome::Delivered
        }
        LocalDelivery::NotConnected => {
            counter!(BUS_DROPS_TOTAL, "reason" => "not_here").increment(1);
            EnvelopeOutcome::NotHere
        }
        LocalDelivery::Failed(e) => {
            warn!(%receiver_id, %message_id, error = %e, "envelope delivery failed");
            counter!(BUS_DROPS_TOTAL, "reason" => "write_failed").increment(1);
            EnvelopeOutcome::Failed(e)
        }
    }
}

/// Delay before reconnect attempt `attempt` (zero-based): `base * 2^attempt`,
/// capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(1u32 << attempt.min(31)).min(max)
}

/// Shortest delay between resubscribe attempts.
const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

/// Long-lived subscription feeding the local registry.
pub struct FanoutSubscriber {
    pubsub: Arc<dyn PubSubBackend>,
    registry: Arc<ConnectionRegistry>,
    channel: String,
    reconnect_base: Duration,
    reconnect_max: Duration,
}

impl FanoutSubscriber {
    /// Subscriber on `channel`, with default reconnect timing.
    pub fn new(
        pubsub: Arc<dyn PubSubBackend>,
        registry: Arc<ConnectionRegistry>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            pubsub,
            registry,
            channel: channel.into(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }

    /// Override reconnect timing. `base` is raised to at least 10ms.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base.max(MIN_RECONNECT_DELAY);
        self.reconnect_max = max.max(self.reconnect_base);
        self
    }

    /// Open the subscription and spawn the receive loop.
    ///
    /// The first subscribe attempt completes before this returns, so anything
    /// published afterwards is seen. If it fails, the loop keeps retrying in
    /// the background.
    pub async fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        let initial = match self.pubsub.subscribe(&self.channel).await {
            Ok(stream) => {
                info!(channel = %self.channel, "subscribed to fanout channel");
                Some(stream)
            }
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "initial subscribe failed, retrying");
                None
            }
        };
        tokio::spawn(self.run(initial, cancel))
    }

    async fn run(self, mut stream: Option<PayloadStream>, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if let Some(mut active) = stream.take() {
                attempt = 0;
                loop {
                    let next = tokio::select! {
                        () = cancel.cancelled() => {
                            debug!(channel = %self.channel, "subscriber stopped");
                            return;
                        }
                        next = active.next() => next,
                    };
                    match next {
                        Some(payload) => {
                            let _ = deliver_envelope(&self.registry, &payload);
                        }
                        None => break,
                    }
                }
                warn!(channel = %self.channel, "subscription lost");
            }

            let delay = backoff_delay(attempt, self.reconnect_base, self.reconnect_max);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(channel = %self.channel, "subscriber stopped");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.pubsub.subscribe(&self.channel).await {
                Ok(s) => {
                    info!(channel = %self.channel, attempt, "resubscribed to fanout channel");
                    stream = Some(s);
                }
                Err(e) => {
                    warn!(channel = %self.channel, attempt, error = %e, "resubscribe failed");
                }
            }
        }
    }
}
