//! Error hierarchy for the chat relay.
//!
//! - [`RelayError`]: top-level enum covering every failure domain
//! - [`StoreError`]: the persistence collaborator failed (fatal to a send)
//! - [`BackendError`]: the shared presence / pub-sub backend failed
//! - [`DeliveryError`]: writing to a live connection failed
//!
//! Every error maps onto an [`ErrorSeverity`], which is what callers branch
//! on: only [`ErrorSeverity::Fatal`] ever reaches the client that sent a
//! message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::ConnectionId;

/// How a failure affects the operation that hit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Aborts the operation and is surfaced to the caller.
    Fatal,
    /// Operation continues with reduced, process-local reach.
    Degraded,
    /// Logged and dropped; nothing is retried.
    Transient,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Degraded => write!(f, "degraded"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RelayError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Persistence failure.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Shared backend failure.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// Connection write failure.
    #[error("{0}")]
    Delivery(#[from] DeliveryError),

    /// JSON encode / decode failure.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl RelayError {
    /// Severity class of this error.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Store(_) => ErrorSeverity::Fatal,
            Self::Backend(_) => ErrorSeverity::Degraded,
            Self::Delivery(_) | Self::Codec(_) => ErrorSeverity::Transient,
        }
    }

    /// Whether this error must abort the current send.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "STORE_ERROR",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Delivery(DeliveryError::Closed { .. }) => "CONNECTION_CLOSED",
            Self::Delivery(DeliveryError::Full { .. }) => "CONNECTION_FULL",
            Self::Codec(_) => "CODEC_ERROR",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreError
// ─────────────────────────────────────────────────────────────────────────────

/// The persistence collaborator could not create a message.
#[derive(Debug, Error)]
#[error("message store failed: {message}")]
pub struct StoreError {
    /// Human-readable description.
    pub message: String,
    /// Underlying driver error, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Store error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Store error wrapping a driver error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BackendError
// ─────────────────────────────────────────────────────────────────────────────

/// The shared presence / pub-sub backend rejected or could not run a command.
#[derive(Debug, Error)]
#[error("shared backend {operation} failed: {message}")]
pub struct BackendError {
    /// Backend command that failed (`sadd`, `publish`, `subscribe`, ...).
    pub operation: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Underlying client error, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    /// Backend error with a message only.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Backend error wrapping a client error.
    pub fn with_source(
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            operation,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// The backend could not be reached at all.
    pub fn unavailable(operation: &'static str) -> Self {
        Self::new(operation, "backend unavailable")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeliveryError
// ─────────────────────────────────────────────────────────────────────────────

/// A frame could not be queued on a live connection.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's writer has gone away.
    #[error("connection {connection_id} is closed")]
    Closed {
        /// Affected connection.
        connection_id: ConnectionId,
    },
    /// The connection's outbound buffer is full.
    #[error("connection {connection_id} send buffer is full")]
    Full {
        /// Affected connection.
        connection_id: ConnectionId,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
