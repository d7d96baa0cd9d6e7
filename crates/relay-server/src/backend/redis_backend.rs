//! Redis-backed presence set and fanout channel.
//!
//! Commands go through a [`ConnectionManager`], which reconnects on its own;
//! each subscription opens a dedicated pub/sub connection because a Redis
//! connection in subscribe mode cannot run other commands.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use relay_core::BackendError;
use tracing::{debug, warn};

use super::{MembershipBackend, PayloadStream, PubSubBackend};

/// Upper bound on a single command round trip.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on establishing a connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared backend on a Redis deployment.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis.
    ///
    /// Supports both `redis://` and `rediss://` URLs. Fails if the server
    /// cannot be reached now or does not answer a `PING`; the caller decides
    /// whether to degrade. Every command is bounded by [`RESPONSE_TIMEOUT`].
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|e| BackendError::with_source("connect", e))?;
        let conn = ConnectionManager::new_with_config(client.clone(), manager_config())
            .await
            .map_err(|e| BackendError::with_source("connect", e))?;
        let backend = Self { client, conn };
        backend.ping().await?;
        debug!("redis connection established");
        Ok(backend)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BackendError::with_source("ping", e))?;
        Ok(())
    }
}

fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_response_timeout(RESPONSE_TIMEOUT)
        .set_connection_timeout(CONNECTION_TIMEOUT)
}

#[async_trait]
impl MembershipBackend for RedisBackend {
    async fn add(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| BackendError::with_source("sadd", e))?;
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .srem(key, member)
            .await
            .map_err(|e| BackendError::with_source("srem", e))?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member)
            .await
            .map_err(|e| BackendError::with_source("sismember", e))
    }
}

#[async_trait]
impl PubSubBackend for RedisBackend {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BackendError::with_source("publish", e))?;
        debug!(channel, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BackendError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BackendError::with_source("subscribe", e))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BackendError::with_source("subscribe", e))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "non-UTF8 pub/sub payload dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
