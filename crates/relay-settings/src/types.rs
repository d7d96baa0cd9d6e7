//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs the fields it changes.

use serde::{Deserialize, Serialize};

/// Default name of the cluster-wide online-users set.
pub const DEFAULT_PRESENCE_KEY: &str = "online-users";

/// Default fanout channel for chat envelopes.
pub const DEFAULT_CHAT_CHANNEL: &str = "chat-messages";

/// Root settings type for a relay process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Shared backend (presence set + fanout channel).
    pub redis: RedisSettings,
    /// Per-connection settings.
    pub connection: ConnectionSettings,
    /// Fanout subscriber settings.
    pub subscriber: SubscriberSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check cross-field constraints the types alone cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        if self.connection.send_buffer == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "connection.sendBuffer must be at least 1".into(),
            ));
        }
        if self.subscriber.reconnect_base_ms == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "subscriber.reconnectBaseMs must be at least 1".into(),
            ));
        }
        if self.subscriber.reconnect_base_ms > self.subscriber.reconnect_max_ms {
            return Err(crate::SettingsError::InvalidValue(
                "subscriber.reconnectBaseMs must not exceed reconnectMaxMs".into(),
            ));
        }
        if self.redis.channel.is_empty() || self.redis.presence_key.is_empty() {
            return Err(crate::SettingsError::InvalidValue(
                "redis.channel and redis.presenceKey must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

/// Shared backend settings.
///
/// With no `url` the process runs in local-only mode: presence and delivery
/// are scoped to this process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSettings {
    /// Connection URL (`redis://` or `rediss://`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Key of the cluster-wide online-users set.
    pub presence_key: String,
    /// Pub/sub channel carrying chat envelopes.
    pub channel: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: None,
            presence_key: DEFAULT_PRESENCE_KEY.to_string(),
            channel: DEFAULT_CHAT_CHANNEL.to_string(),
        }
    }
}

/// Per-connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Outbound frames buffered per connection before writes are dropped.
    pub send_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { send_buffer: 1024 }
    }
}

/// Fanout subscriber settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriberSettings {
    /// First resubscribe delay after the stream drops.
    pub reconnect_base_ms: u64,
    /// Upper bound on the resubscribe delay.
    pub reconnect_max_ms: u64,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter level (`RUST_LOG` still wins).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
