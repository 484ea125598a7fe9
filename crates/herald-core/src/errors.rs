//! Error hierarchy for herald.
//!
//! Three failure domains, all absorbed at the component boundary where they
//! occur:
//!
//! - [`NetworkError`]: a fetch/acknowledge/publish HTTP request failed
//! - [`TransportError`]: the broker connection dropped or misbehaved
//! - [`DeserializationError`]: a payload could not be decoded into a record
//!
//! [`HeraldError`] wraps all three for callers that need a single type.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of payload characters kept for diagnostics.
const PAYLOAD_PREVIEW_CHARS: usize = 120;

// ─────────────────────────────────────────────────────────────────────────────
// HeraldError: top-level error enum
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// HTTP collaborator failure.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Broker connection failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed payload.
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
}

impl HeraldError {
    /// Whether repeating the failed operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Transport(_) => true,
            Self::Deserialization(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NetworkError
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP operation against the notification origin server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOperation {
    /// Bulk fetch of the user's notifications.
    Fetch,
    /// Acknowledgement (mark as read).
    Acknowledge,
    /// Creating and publishing a notification.
    Publish,
    /// Unread counter query.
    Count,
}

impl fmt::Display for RequestOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::Publish => write!(f, "publish"),
            Self::Count => write!(f, "count"),
        }
    }
}

/// A request to the origin server failed.
#[derive(Debug, Error)]
#[error("{operation} request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
pub struct NetworkError {
    /// Which request failed.
    pub operation: RequestOperation,
    /// HTTP status if a response was received.
    pub status: Option<u16>,
    /// Human-readable detail.
    pub message: String,
}

impl NetworkError {
    /// Failure before any response was received (connect, timeout, body read).
    pub fn transport(operation: RequestOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            status: None,
            message: message.into(),
        }
    }

    /// Non-success HTTP status.
    pub fn status(operation: RequestOperation, status: u16, message: impl Into<String>) -> Self {
        Self {
            operation,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Connection failures, timeouts, 429 and 5xx may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(s) => s == 429 || s >= 500,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of the broker connection. Always recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("connect to {endpoint} failed: {message}")]
    Connect {
        /// Endpoint URL.
        endpoint: String,
        /// Underlying cause.
        message: String,
    },

    /// The STOMP handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The broker sent an `ERROR` frame.
    #[error("broker error: {message}")]
    Broker {
        /// The `message` header.
        message: String,
        /// The frame body, if any.
        details: Option<String>,
    },

    /// No inbound frame arrived within the liveness window.
    #[error("heart-beat timeout after {elapsed_ms}ms")]
    HeartbeatTimeout {
        /// Time since the last inbound frame.
        elapsed_ms: u64,
    },

    /// A frame could not be parsed.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Reading from or writing to the socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    /// Whether the broker itself reported a protocol-level error, as opposed
    /// to the connection simply going away.
    #[must_use]
    pub fn is_broker_error(&self) -> bool {
        matches!(
            self,
            Self::Broker { .. } | Self::Handshake(_) | Self::Frame(_) | Self::HeartbeatTimeout { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DeserializationError
// ─────────────────────────────────────────────────────────────────────────────

/// A payload could not be decoded into a notification record.
#[derive(Debug, Error)]
#[error("malformed notification payload: {message}")]
pub struct DeserializationError {
    /// Decoder message.
    pub message: String,
    /// Leading part of the offending payload.
    pub payload_preview: String,
}

impl DeserializationError {
    /// Build from a decoder error and the offending payload.
    pub fn new(err: &impl fmt::Display, payload: &str) -> Self {
        Self {
            message: err.to_string(),
            payload_preview: preview(payload),
        }
    }
}

fn preview(payload: &str) -> String {
    if payload.chars().count() <= PAYLOAD_PREVIEW_CHARS {
        payload.to_owned()
    } else {
        let mut s: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        s.push('…');
        s
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
