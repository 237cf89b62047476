//! Inbound events from the chat host and replies sent back to it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, stable identifier of a message sender
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap a host-specific sender id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Conversation identifiers carried from the triggering event to the downstream bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Conversation the message arrived in
    pub session_id: String,
    /// Reference to the original message, used for threaded replies
    pub message_ref: String,
    /// Sender of the original message
    pub user_id: UserId,
}

/// Kind of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Plain text message
    Text,
    /// Image materialized by the host as a local file
    Image,
}

/// Event dispatched by the chat host
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Message type
    pub kind: EventKind,
    /// Conversation identifiers, including the sender
    pub session: SessionContext,
    /// Message text, or the local file path for images
    pub content: String,
}

impl InboundEvent {
    /// Create a text event
    #[must_use]
    pub fn text(session: SessionContext, text: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Text,
            session,
            content: text.into(),
        }
    }

    /// Create an image event; `path` must point to a file the host has written
    #[must_use]
    pub fn image(session: SessionContext, path: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Image,
            session,
            content: path.into(),
        }
    }

    /// Sender of the event
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.session.user_id
    }
}

/// Type of an outbound reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    /// Plain text
    Text,
}

/// Reply emitted to the originating channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Reply type
    pub kind: ReplyKind,
    /// Reply body
    pub content: String,
}

impl Reply {
    /// Create a text reply
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Text,
            content: content.into(),
        }
    }
}
