//! In-process shared backend.
//!
//! Several nodes holding the same `Arc<MemoryBackend>` behave like processes
//! sharing one Redis: they see one presence set and one set of channels.
//! [`MemoryBackend::set_reachable`] simulates the backend going away.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use relay_core::BackendError;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{MembershipBackend, PayloadStream, PubSubBackend};

/// Per-channel buffer before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Shared backend kept entirely in memory.
pub struct MemoryBackend {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    reachable: AtomicBool,
    publishes: AtomicU64,
}

impl MemoryBackend {
    /// Create a reachable, empty backend.
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            publishes: AtomicU64::new(0),
        }
    }

    /// Make every subsequent command succeed (`true`) or fail (`false`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Whether commands currently succeed.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Number of successful publishes, across all channels.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Snapshot of the set at `key`.
    pub fn members(&self, key: &str) -> HashSet<String> {
        self.sets.lock().get(key).cloned().unwrap_or_default()
    }

    fn check(&self, operation: &'static str) -> Result<(), BackendError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(BackendError::unavailable(operation))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipBackend for MemoryBackend {
    async fn add(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.check("sadd")?;
        let _ = self
            .sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), BackendError> {
        self.check("srem")?;
        if let Some(set) = self.sets.lock().get_mut(key) {
            let _ = set.remove(member);
        }
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, BackendError> {
        self.check("sismember")?;
        Ok(self
            .sets
            .lock()
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }
}

#[async_trait]
impl PubSubBackend for MemoryBackend {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError> {
        self.check("publish")?;
        // No subscribers is not an error, same as PUBLISH returning 0.
        let _ = self.sender(channel).send(payload);
        let _ = self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PayloadStream, BackendError> {
        self.check("subscribe")?;
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "subscriber lagged, payloads lost");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
