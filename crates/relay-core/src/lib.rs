//! # relay-core
//!
//! Shared vocabulary for the chat relay:
//!
//! - **Branded IDs**: `UserId`, `ChatId`, `MessageId`, `ConnectionId`
//! - **Wire types**: `MessageRecord`, `ChatEnvelope`, `ClientNotification`,
//!   `OutgoingMessage`
//! - **Errors**: `RelayError` hierarchy via `thiserror`, classified by
//!   `ErrorSeverity`
//! - **Logging**: tracing subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;

pub use errors::{BackendError, DeliveryError, ErrorSeverity, RelayError, StoreError};
pub use ids::{ChatId, ConnectionId, MessageId, UserId};
pub use messages::{
    ChatEnvelope, ClientNotification, MessageRecord, MessageSender, MessageType,
    NEW_MESSAGE_EVENT, OutgoingMessage,
};
