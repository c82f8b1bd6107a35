//! In-memory doubles for the durable collaborators, used across the crate's
//! unit tests. Kept faithful to the real store's semantics: insertion-order
//! membership, monotonic message sequence numbers, read-and-acknowledge pull.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::traits::{
    BackendError, MembershipOracle, MessageStore, NotificationStore, SessionStore,
};
use crate::types::{
    now_ms, AuthenticatedSession, ChatId, ChatMessage, ConnectionId, NotificationRecord,
    PendingNotification, SessionFocus, StaleBinding, UserId,
};

#[derive(Debug, Clone)]
struct SessionRow {
    connection_id: Option<ConnectionId>,
    focus: Option<ChatId>,
    bound_at_ms: u64,
    expires_at_ms: u64,
}

#[derive(Debug)]
struct QueueRow {
    id: i64,
    record: NotificationRecord,
    delivered: bool,
}

/// In-memory implementation of every collaborator trait.
#[derive(Default)]
pub struct MemBackend {
    users: Mutex<HashMap<UserId, String>>,
    chats: Mutex<HashMap<ChatId, Vec<UserId>>>,
    messages: Mutex<Vec<ChatMessage>>,
    queue: Mutex<Vec<QueueRow>>,
    sessions: Mutex<HashMap<(UserId, String), SessionRow>>,
    next_seq: AtomicI64,
    next_queue_id: AtomicI64,
    /// Number of upcoming `enqueue` calls that fail, for retry-path tests.
    enqueue_failures: AtomicU32,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, name: &str) -> UserId {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(id, name.to_string());
        id
    }

    pub fn add_chat(&self, members: &[UserId]) -> ChatId {
        let id = Uuid::new_v4();
        self.chats.lock().unwrap().insert(id, members.to_vec());
        id
    }

    pub fn add_session(&self, user_id: UserId, token: &str, expires_at_ms: u64) {
        self.sessions.lock().unwrap().insert(
            (user_id, token.to_string()),
            SessionRow {
                connection_id: None,
                focus: None,
                bound_at_ms: 0,
                expires_at_ms,
            },
        );
    }

    pub fn focus_of(&self, user_id: UserId, token: &str) -> Option<ChatId> {
        self.sessions
            .lock()
            .unwrap()
            .get(&(user_id, token.to_string()))
            .and_then(|row| row.focus)
    }

    pub fn binding_of(&self, user_id: UserId, token: &str) -> Option<ConnectionId> {
        self.sessions
            .lock()
            .unwrap()
            .get(&(user_id, token.to_string()))
            .and_then(|row| row.connection_id.clone())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn pending_for(&self, user_id: UserId) -> Vec<NotificationRecord> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.delivered && row.record.user_id == user_id)
            .map(|row| row.record.clone())
            .collect()
    }

    pub fn fail_enqueue(&self, times: u32) {
        self.enqueue_failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipOracle for MemBackend {
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, BackendError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .map(|members| members.contains(&user_id))
            .unwrap_or(false))
    }
}

#[async_trait]
impl MessageStore for MemBackend {
    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, BackendError> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content: content.to_string(),
            created_at_ms: now_ms(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, BackendError> {
        Ok(self
            .chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, BackendError> {
        let mut messages: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at_ms, m.seq));
        Ok(messages)
    }
}

#[async_trait]
impl NotificationStore for MemBackend {
    async fn enqueue(&self, records: &[NotificationRecord]) -> Result<(), BackendError> {
        let failures = self.enqueue_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.enqueue_failures.store(failures - 1, Ordering::SeqCst);
            return Err(BackendError::Storage("injected enqueue failure".into()));
        }

        let mut queue = self.queue.lock().unwrap();
        for record in records {
            queue.push(QueueRow {
                id: self.next_queue_id.fetch_add(1, Ordering::SeqCst) + 1,
                record: record.clone(),
                delivered: false,
            });
        }
        Ok(())
    }

    async fn pull_and_mark_delivered(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PendingNotification>, BackendError> {
        let messages = self.messages.lock().unwrap().clone();
        let users = self.users.lock().unwrap().clone();

        let mut queue = self.queue.lock().unwrap();
        let mut pulled = Vec::new();
        for row in queue
            .iter_mut()
            .filter(|row| !row.delivered && row.record.user_id == user_id)
        {
            row.delivered = true;
            let message = messages
                .iter()
                .find(|m| m.id == row.record.message_id)
                .cloned()
                .ok_or_else(|| BackendError::Storage("dangling message id".into()))?;
            pulled.push(PendingNotification {
                id: row.id,
                chat_id: row.record.chat_id,
                message_id: row.record.message_id,
                sender_id: message.sender_id,
                sender_name: users
                    .get(&message.sender_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                content: message.content,
                created_at_ms: message.created_at_ms,
            });
        }
        pulled.sort_by_key(|n| n.id);
        Ok(pulled)
    }
}

#[async_trait]
impl SessionStore for MemBackend {
    async fn bind_connection(
        &self,
        user_id: UserId,
        token: &str,
        connection_id: &ConnectionId,
        bound_at_ms: u64,
    ) -> Result<bool, BackendError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&(user_id, token.to_string())) {
            Some(row) => {
                row.connection_id = Some(connection_id.clone());
                row.bound_at_ms = bound_at_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_focus(
        &self,
        user_id: UserId,
        token: &str,
        chat_id: Option<ChatId>,
    ) -> Result<(), BackendError> {
        if let Some(row) = self
            .sessions
            .lock()
            .unwrap()
            .get_mut(&(user_id, token.to_string()))
        {
            row.focus = chat_id;
        }
        Ok(())
    }

    async fn clear_connection(&self, user_id: UserId, token: &str) -> Result<(), BackendError> {
        if let Some(row) = self
            .sessions
            .lock()
            .unwrap()
            .get_mut(&(user_id, token.to_string()))
        {
            row.connection_id = None;
            row.focus = None;
        }
        Ok(())
    }

    async fn focused_sessions(&self, user_id: UserId) -> Result<Vec<SessionFocus>, BackendError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|((uid, _), row)| *uid == user_id && row.connection_id.is_some())
            .map(|(_, row)| SessionFocus {
                connection_id: row.connection_id.clone().unwrap(),
                focus_chat_id: row.focus,
            })
            .collect())
    }

    async fn reap_expired(&self, now_ms: u64) -> Result<u64, BackendError> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, row| row.expires_at_ms > now_ms);
        Ok((before - sessions.len()) as u64)
    }

    async fn stale_candidates(&self, cutoff_ms: u64) -> Result<Vec<StaleBinding>, BackendError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, row)| row.connection_id.is_some() && row.bound_at_ms <= cutoff_ms)
            .map(|((uid, token), row)| StaleBinding {
                user_id: *uid,
                session_token: token.clone(),
                connection_id: row.connection_id.clone().unwrap(),
                bound_at_ms: row.bound_at_ms,
            })
            .collect())
    }

    async fn clear_bindings(&self, bindings: &[StaleBinding]) -> Result<u64, BackendError> {
        let mut sessions = self.sessions.lock().unwrap();
        let mut cleared = 0;
        for binding in bindings {
            if let Some(row) =
                sessions.get_mut(&(binding.user_id, binding.session_token.clone()))
            {
                // Only clear while the row still carries the stale key.
                if row.connection_id.as_ref() == Some(&binding.connection_id) {
                    row.connection_id = None;
                    row.focus = None;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    async fn find_by_token(
        &self,
        token: &str,
        now_ms: u64,
    ) -> Result<Option<AuthenticatedSession>, BackendError> {
        let users = self.users.lock().unwrap();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|((_, tok), row)| tok == token && row.expires_at_ms > now_ms)
            .map(|((uid, tok), _)| AuthenticatedSession {
                user_id: *uid,
                session_token: tok.clone(),
                display_name: users.get(uid).cloned().unwrap_or_else(|| "Unknown".into()),
            }))
    }
}
