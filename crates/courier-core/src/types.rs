//! Core identifier and record types shared across the Courier crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A user identifier.
pub type UserId = Uuid;

/// A chat identifier.
pub type ChatId = Uuid;

/// A message identifier.
pub type MessageId = Uuid;

/// An opaque session token issued at sign-in, outside this subsystem.
pub type SessionToken = String;

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Unique identifier for a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    /// Creation time, epoch milliseconds.
    pub created_at_ms: u64,
    /// Store-assigned insertion sequence; breaks creation-time ties so
    /// display order is stable under coarse clock resolution.
    pub seq: i64,
}

/// A durable "message m was not delivered live to user u" record, prior to
/// enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// An undelivered notification as returned by a pull: the queue row joined
/// with message content and sender display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    /// Queue row id.
    pub id: i64,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub created_at_ms: u64,
}

/// The (connection, focused chat) view of one durable session binding,
/// consulted during delivery classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFocus {
    pub connection_id: ConnectionId,
    pub focus_chat_id: Option<ChatId>,
}

/// A session binding whose correlation key may refer to a dead connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleBinding {
    pub user_id: UserId,
    pub session_token: SessionToken,
    pub connection_id: ConnectionId,
    /// When the binding was written; a reconciliation pass only clears
    /// bindings at or before its own snapshot cutoff.
    pub bound_at_ms: u64,
}

/// An authenticated identity resolved from a session token at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub user_id: UserId,
    pub session_token: SessionToken,
    /// Display name cached at authentication time.
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
