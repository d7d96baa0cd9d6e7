//! Message persistence seam.
//!
//! The relay never owns storage. It calls [`MessageStore::create_message`]
//! and treats the returned record as the message. [`MemoryMessageStore`]
//! backs tests and single-process development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use relay_core::{ChatId, MessageRecord, MessageSender, MessageType, StoreError, UserId};

/// External persistence for chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a text message and return the stored record.
    async fn create_message(
        &self,
        chat_id: &ChatId,
        sender_id: &UserId,
        text: &str,
    ) -> Result<MessageRecord, StoreError>;
}

/// In-memory store issuing IDs `m1`, `m2`, ...
#[derive(Default)]
pub struct MemoryMessageStore {
    next_id: AtomicU64,
    names: Mutex<HashMap<UserId, String>>,
    messages: Mutex<Vec<MessageRecord>>,
    failing: AtomicBool,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a display name for `user_id`. Unknown senders are named
    /// after their ID.
    #[must_use]
    pub fn with_user(self, user_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        let _ = self.names.lock().insert(user_id.into(), name.into());
        self
    }

    /// Make every subsequent write fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of stored messages, oldest first.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(
        &self,
        chat_id: &ChatId,
        sender_id: &UserId,
        text: &str,
    ) -> Result<MessageRecord, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::new("store unavailable"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let name = self
            .names
            .lock()
            .get(sender_id)
            .cloned()
            .unwrap_or_else(|| sender_id.to_string());
        let record = MessageRecord {
            id: format!("m{n}").into(),
            message_type: MessageType::Text,
            chat_id: chat_id.clone(),
            sender_id: sender_id.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
            sender: MessageSender {
                id: sender_id.clone(),
                name,
            },
        };
        self.messages.lock().push(record.clone());
        Ok(record)
    }
}
