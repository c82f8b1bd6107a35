//! Collaborator traits consumed by the fanout router and session manager.
//!
//! Everything durable lives behind these traits: chat membership, the message
//! log, the notification queue and the session table. The server injects the
//! SQLite implementations from `courier-store`; tests inject in-memory
//! doubles. Every method is an async suspension point.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    AuthenticatedSession, ChatId, ChatMessage, ConnectionId, NotificationRecord,
    PendingNotification, SessionFocus, StaleBinding, UserId,
};

/// Failure of a durable collaborator. Always treated as transient and
/// retryable by callers; never carries per-recipient semantics.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The underlying store reported an error.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The blocking storage task could not complete (runtime shutdown,
    /// poisoned lock).
    #[error("storage task halted: {0}")]
    TaskHalted(String),
}

/// Read-only chat membership lookups.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Is `user_id` a member of `chat_id`?
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, BackendError>;
}

/// Message log and membership enumeration.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist exactly one new message. This is the durability point of a
    /// send: nothing downstream may roll it back.
    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, BackendError>;

    /// Full membership of a chat, in insertion order.
    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, BackendError>;

    /// Chat history ordered by `(created_at_ms, seq)`, oldest first.
    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, BackendError>;
}

/// Durable per-user notification inbox.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Append-only batch insert; one statement for the whole batch.
    async fn enqueue(&self, records: &[NotificationRecord]) -> Result<(), BackendError>;

    /// Return all undelivered notifications for a user, oldest first,
    /// enriched with message content and sender name, and mark exactly the
    /// returned rows delivered in the same logical operation.
    ///
    /// Read-and-acknowledge: a crash between read and mark may replay a pull;
    /// consumers dedupe by message id.
    async fn pull_and_mark_delivered(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PendingNotification>, BackendError>;
}

/// Durable session bindings: identity + device to correlation key and focus.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Associate a live connection with the durable session matched by
    /// `(user_id, token)`. Returns false when no session row matched.
    async fn bind_connection(
        &self,
        user_id: UserId,
        token: &str,
        connection_id: &ConnectionId,
        bound_at_ms: u64,
    ) -> Result<bool, BackendError>;

    /// Record the focused chat for a session; `None` clears focus.
    async fn set_focus(
        &self,
        user_id: UserId,
        token: &str,
        chat_id: Option<ChatId>,
    ) -> Result<(), BackendError>;

    /// Null both correlation key and focus on disconnect.
    async fn clear_connection(&self, user_id: UserId, token: &str) -> Result<(), BackendError>;

    /// All of a user's sessions with a non-null correlation key, with their
    /// focus, for delivery classification.
    async fn focused_sessions(&self, user_id: UserId) -> Result<Vec<SessionFocus>, BackendError>;

    /// Delete sessions expired at or before `now_ms`; returns the count.
    async fn reap_expired(&self, now_ms: u64) -> Result<u64, BackendError>;

    /// Sessions with a non-null correlation key bound at or before
    /// `cutoff_ms` — candidates for stale-connection reconciliation.
    async fn stale_candidates(&self, cutoff_ms: u64) -> Result<Vec<StaleBinding>, BackendError>;

    /// Clear correlation key and focus for the given bindings. A row is only
    /// cleared while it still carries the listed connection id, so a binding
    /// refreshed after the candidate snapshot is left alone. Returns the
    /// number of rows cleared.
    async fn clear_bindings(&self, bindings: &[StaleBinding]) -> Result<u64, BackendError>;

    /// Resolve a session token to an authenticated identity, provided the
    /// session has not expired as of `now_ms`.
    async fn find_by_token(
        &self,
        token: &str,
        now_ms: u64,
    ) -> Result<Option<AuthenticatedSession>, BackendError>;
}
