//! Standalone relay node for single-host development.
//!
//! Loads settings, installs logging, starts a [`ChatNode`] over the in-memory
//! message store and runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_server::{ChatNode, MemoryMessageStore};

#[tokio::main]
async fn main() -> Result<()> {
    let settings_path = relay_settings::settings_path();
    let settings = relay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;

    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }

    let node = ChatNode::start(settings, Arc::new(MemoryMessageStore::new())).await;
    tracing::info!(mode = %node.mode(), "relay node ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    node.shutdown(Some(Duration::from_secs(5))).await;
    tracing::info!("shutdown complete");
    Ok(())
}
