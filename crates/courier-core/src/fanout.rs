//! The fanout router: per-recipient delivery decisions for new messages.
//!
//! One inbound send becomes exactly one persisted message, zero or more live
//! delivery events, and zero or more durable notification records. The
//! invariant the router maintains: every non-sender member of the chat gets
//! exactly one of {live delivery, notification record} — never both, never
//! neither.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_protocol::Event;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::registry::ConnectionRegistry;
use crate::traits::{BackendError, MembershipOracle, MessageStore, NotificationStore, SessionStore};
use crate::types::{ChatId, ChatMessage, ConnectionId, NotificationRecord, UserId};

/// Retry policy for the notification batch write.
#[derive(Debug, Clone)]
pub struct NotifyRetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for NotifyRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Maximum message length in characters, after trimming.
    pub max_content_len: usize,
    /// Bound on validate + authorize + persist; exceeding it fails the send
    /// with a retryable error before anything is persisted.
    pub send_timeout: Duration,
    /// Whether the sender's *other* devices receive a live echo of their own
    /// send. The sender's own UI reflects its sends optimistically either
    /// way, and the sender never receives durable notifications.
    pub echo_to_sender_devices: bool,
    /// Retry policy for the notification batch write.
    pub notify_retry: NotifyRetryPolicy,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_content_len: 4096,
            send_timeout: Duration::from_secs(10),
            echo_to_sender_devices: false,
            notify_retry: NotifyRetryPolicy::default(),
        }
    }
}

/// Why a send was refused or failed.
#[derive(Debug, Error)]
pub enum SendError {
    /// Content empty after trimming.
    #[error("message content is empty")]
    EmptyContent,

    /// Content longer than the configured maximum.
    #[error("message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    /// Chat id is not a well-formed identifier.
    #[error("malformed chat id")]
    MalformedChatId,

    /// Sender is not a member of the target chat.
    #[error("sender is not a member of this chat")]
    NotAMember,

    /// A collaborator failed before the message was persisted.
    #[error("storage failure: {0}")]
    Store(#[from] BackendError),

    /// Authorization/persistence did not complete within the send timeout.
    #[error("send timed out before the message was persisted")]
    Timeout,
}

impl SendError {
    /// Whether the sender should retry the same send.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Store(_) | SendError::Timeout)
    }
}

/// Result of a completed send. The message is persisted in every case.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The persisted message.
    pub message: ChatMessage,
    /// Live delivery events emitted across all recipients and devices.
    pub live_deliveries: usize,
    /// Notification records accumulated for offline recipients.
    pub queued: usize,
    /// True when the notification batch could not be written; affected
    /// recipients will see the message through chat history instead.
    pub degraded: bool,
}

/// Per-recipient classification result.
enum Delivery {
    /// Emitted this many live events.
    Live(usize),
    /// No eligible live destination: queue one durable notification.
    Queue,
    /// Nothing to do (sender with echo disabled or no other devices).
    Skip,
}

/// The fanout decision engine.
///
/// Holds the in-memory registry plus the injected durable collaborators.
/// All state mutated during a send lives in the collaborators; the router
/// itself is freely shared across connection tasks.
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<dyn MembershipOracle>,
    messages: Arc<dyn MessageStore>,
    notifications: Arc<dyn NotificationStore>,
    sessions: Arc<dyn SessionStore>,
    config: FanoutConfig,
}

impl FanoutRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        membership: Arc<dyn MembershipOracle>,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<dyn NotificationStore>,
        sessions: Arc<dyn SessionStore>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            registry,
            membership,
            messages,
            notifications,
            sessions,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Process one send: validate, authorize, persist, then fan out.
    ///
    /// Validation and authorization failures reject the send with nothing
    /// persisted and nobody notified. Once persistence succeeds the call
    /// always returns `Ok`: downstream delivery problems degrade, they do
    /// not fail the send. Callers must drive this future to completion even
    /// if the originating connection goes away.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] describing the rejection; see
    /// [`SendError::is_retryable`].
    pub async fn send_message(
        &self,
        sender_id: UserId,
        sender_name: &str,
        origin: &ConnectionId,
        chat_id: &str,
        content: &str,
    ) -> Result<SendOutcome, SendError> {
        // 1. Validate.
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyContent);
        }
        if content.chars().count() > self.config.max_content_len {
            return Err(SendError::ContentTooLong {
                max: self.config.max_content_len,
            });
        }
        let chat_id: ChatId = chat_id.parse().map_err(|_| SendError::MalformedChatId)?;

        // 2 + 3. Authorize and persist, under the send timeout. This is the
        // durability point: nothing past here can roll the message back.
        let persist = async {
            if !self.membership.is_member(chat_id, sender_id).await? {
                return Err(SendError::NotAMember);
            }
            Ok(self
                .messages
                .create_message(chat_id, sender_id, content)
                .await?)
        };
        let message = match tokio::time::timeout(self.config.send_timeout, persist).await {
            Ok(result) => result?,
            Err(_) => return Err(SendError::Timeout),
        };

        debug!(
            message = %message.id,
            chat = %chat_id,
            sender = %sender_id,
            "Message persisted"
        );

        Ok(self.fan_out(message, sender_id, sender_name, origin).await)
    }

    /// Steps 4-6: enumerate, classify, dispatch, batch-enqueue. Infallible
    /// by design — every failure past the durability point degrades.
    async fn fan_out(
        &self,
        message: ChatMessage,
        sender_id: UserId,
        sender_name: &str,
        origin: &ConnectionId,
    ) -> SendOutcome {
        let members = match self.messages.chat_members(message.chat_id).await {
            Ok(members) => members,
            Err(e) => {
                error!(
                    message = %message.id,
                    chat = %message.chat_id,
                    error = %e,
                    "Member enumeration failed after persistence"
                );
                return SendOutcome {
                    message,
                    live_deliveries: 0,
                    queued: 0,
                    degraded: true,
                };
            }
        };

        let mut pending: Vec<NotificationRecord> = Vec::new();
        let mut live_deliveries = 0;

        for member in members {
            let is_sender = member == sender_id;
            if is_sender && !self.config.echo_to_sender_devices {
                continue;
            }

            match self
                .classify(member, is_sender, origin, &message, sender_name)
                .await
            {
                Delivery::Live(count) => live_deliveries += count,
                Delivery::Queue => pending.push(NotificationRecord {
                    user_id: member,
                    chat_id: message.chat_id,
                    message_id: message.id,
                }),
                Delivery::Skip => {}
            }
        }

        let queued = pending.len();
        let degraded = !pending.is_empty() && !self.enqueue_with_retry(&pending).await;

        debug!(
            message = %message.id,
            live = live_deliveries,
            queued,
            degraded,
            "Fanout complete"
        );

        SendOutcome {
            message,
            live_deliveries,
            queued,
            degraded,
        }
    }

    /// Classify one recipient and dispatch live events if eligible.
    ///
    /// Failures here are local to the recipient: logged, folded into the
    /// returned classification, never propagated to the rest of the pass.
    async fn classify(
        &self,
        recipient: UserId,
        is_sender: bool,
        origin: &ConnectionId,
        message: &ChatMessage,
        sender_name: &str,
    ) -> Delivery {
        // Stale-but-not-yet-reaped handles are filtered here: a registered
        // connection whose writer is gone counts as offline.
        let live: Vec<_> = self
            .registry
            .connections_for(recipient)
            .into_iter()
            .filter(|handle| handle.is_open())
            .filter(|handle| !(is_sender && handle.id == *origin))
            .collect();

        if live.is_empty() {
            // The sender's own devices never fall back to durable
            // notifications; their UI reflects the send optimistically.
            return if is_sender {
                Delivery::Skip
            } else {
                Delivery::Queue
            };
        }

        let focus: HashMap<ConnectionId, ChatId> =
            match self.sessions.focused_sessions(recipient).await {
                Ok(sessions) => sessions
                    .into_iter()
                    .filter_map(|s| s.focus_chat_id.map(|chat| (s.connection_id, chat)))
                    .collect(),
                Err(e) => {
                    warn!(
                        user = %recipient,
                        error = %e,
                        "Focus lookup failed; delivering as unfocused"
                    );
                    HashMap::new()
                }
            };

        let mut delivered = 0;
        for handle in &live {
            let is_active = focus.get(&handle.id) == Some(&message.chat_id);
            let event = if is_active {
                Event::NewMessage {
                    id: message.id.to_string(),
                    chat_id: message.chat_id.to_string(),
                    sender_id: message.sender_id.to_string(),
                    sender_name: sender_name.to_string(),
                    content: message.content.clone(),
                    created_at: message.created_at_ms,
                }
            } else {
                Event::Notification {
                    id: message.id.to_string(),
                    chat_id: message.chat_id.to_string(),
                    sender_id: message.sender_id.to_string(),
                    sender_name: sender_name.to_string(),
                    content: message.content.clone(),
                    created_at: message.created_at_ms,
                    is_active_chat: false,
                }
            };

            if handle.emit(event) {
                delivered += 1;
            } else {
                warn!(
                    user = %recipient,
                    connection = %handle.id,
                    "Live emit failed"
                );
            }
        }

        if delivered == 0 {
            // Every live connection raced shutdown between the liveness
            // check and the emit; degrade to a durable notification so the
            // recipient still gets exactly one delivery.
            return if is_sender {
                Delivery::Skip
            } else {
                Delivery::Queue
            };
        }

        Delivery::Live(delivered)
    }

    /// Batch-write the notification records, bounded-retry-then-log.
    /// Returns true on success.
    async fn enqueue_with_retry(&self, records: &[NotificationRecord]) -> bool {
        let policy = &self.config.notify_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.notifications.enqueue(records).await {
                Ok(()) => return true,
                Err(e) if attempt < policy.attempts => {
                    warn!(
                        attempt,
                        error = %e,
                        "Notification batch write failed, retrying"
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => {
                    error!(
                        records = records.len(),
                        error = %e,
                        "Notification batch write failed, giving up"
                    );
                    return false;
                }
            }
        }
    }
}
