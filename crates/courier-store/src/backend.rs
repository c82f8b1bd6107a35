//! Async adapter bridging the blocking [`Database`] onto the collaborator
//! traits from `courier-core`.
//!
//! SQLite calls are blocking, so every trait method hops onto the blocking
//! thread pool and serializes access through a mutex around the single
//! connection. Cross-table atomicity between methods is deliberately not
//! provided; the router does not assume it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use courier_core::traits::{
    BackendError, MembershipOracle, MessageStore, NotificationStore, SessionStore,
};
use courier_core::types::{
    now_ms, AuthenticatedSession, ChatId, ChatMessage, ConnectionId, NotificationRecord,
    PendingNotification, SessionFocus, StaleBinding, UserId,
};

use crate::database::Database;
use crate::error::StoreError;

/// Shared handle to the SQLite store, implementing every collaborator trait.
#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Database>>,
}

impl SqliteBackend {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run a blocking store operation on the blocking pool.
    async fn with_db<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| BackendError::TaskHalted("store lock poisoned".into()))?;
            op(&mut guard).map_err(|e| BackendError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| BackendError::TaskHalted(e.to_string()))?
    }
}

#[async_trait]
impl MembershipOracle for SqliteBackend {
    async fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, BackendError> {
        self.with_db(move |db| db.is_member(chat_id, user_id)).await
    }
}

#[async_trait]
impl MessageStore for SqliteBackend {
    async fn create_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, BackendError> {
        let content = content.to_string();
        self.with_db(move |db| db.insert_message(chat_id, sender_id, &content, now_ms()))
            .await
    }

    async fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, BackendError> {
        self.with_db(move |db| db.chat_members(chat_id)).await
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, BackendError> {
        self.with_db(move |db| db.list_messages(chat_id)).await
    }
}

#[async_trait]
impl NotificationStore for SqliteBackend {
    async fn enqueue(&self, records: &[NotificationRecord]) -> Result<(), BackendError> {
        let records = records.to_vec();
        self.with_db(move |db| db.enqueue_notifications(&records, now_ms()))
            .await
    }

    async fn pull_and_mark_delivered(
        &self,
        user_id: UserId,
    ) -> Result<Vec<PendingNotification>, BackendError> {
        self.with_db(move |db| db.pull_and_mark_delivered(user_id))
            .await
    }
}

#[async_trait]
impl SessionStore for SqliteBackend {
    async fn bind_connection(
        &self,
        user_id: UserId,
        token: &str,
        connection_id: &ConnectionId,
        bound_at_ms: u64,
    ) -> Result<bool, BackendError> {
        let token = token.to_string();
        let connection_id = connection_id.clone();
        self.with_db(move |db| db.bind_connection(user_id, &token, &connection_id, bound_at_ms))
            .await
    }

    async fn set_focus(
        &self,
        user_id: UserId,
        token: &str,
        chat_id: Option<ChatId>,
    ) -> Result<(), BackendError> {
        let token = token.to_string();
        self.with_db(move |db| db.set_focus(user_id, &token, chat_id))
            .await
    }

    async fn clear_connection(&self, user_id: UserId, token: &str) -> Result<(), BackendError> {
        let token = token.to_string();
        self.with_db(move |db| db.clear_connection(user_id, &token))
            .await
    }

    async fn focused_sessions(&self, user_id: UserId) -> Result<Vec<SessionFocus>, BackendError> {
        self.with_db(move |db| db.focused_sessions(user_id)).await
    }

    async fn reap_expired(&self, now_ms: u64) -> Result<u64, BackendError> {
        self.with_db(move |db| db.reap_expired(now_ms)).await
    }

    async fn stale_candidates(&self, cutoff_ms: u64) -> Result<Vec<StaleBinding>, BackendError> {
        self.with_db(move |db| db.stale_candidates(cutoff_ms)).await
    }

    async fn clear_bindings(&self, bindings: &[StaleBinding]) -> Result<u64, BackendError> {
        let bindings = bindings.to_vec();
        self.with_db(move |db| db.clear_bindings(&bindings)).await
    }

    async fn find_by_token(
        &self,
        token: &str,
        now_ms: u64,
    ) -> Result<Option<AuthenticatedSession>, BackendError> {
        let token = token.to_string();
        self.with_db(move |db| db.find_by_token(&token, now_ms))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::fanout::{FanoutConfig, FanoutRouter};
    use courier_core::registry::{ConnectionHandle, ConnectionRegistry};
    use courier_core::session::SessionManager;
    use courier_protocol::Event;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        backend: SqliteBackend,
        registry: Arc<ConnectionRegistry>,
        router: FanoutRouter,
    }

    fn harness() -> Harness {
        let backend = SqliteBackend::new(Database::open_in_memory().unwrap());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = FanoutRouter::new(
            registry.clone(),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            FanoutConfig::default(),
        );
        Harness {
            backend,
            registry,
            router,
        }
    }

    fn seed_user(h: &Harness, name: &str) -> UserId {
        let id = Uuid::new_v4();
        let db = h.backend.db.lock().unwrap();
        db.upsert_user(id, name).unwrap();
        id
    }

    fn seed_chat(h: &Harness, members: &[UserId]) -> ChatId {
        let db = h.backend.db.lock().unwrap();
        let chat = db.create_chat(Some("general")).unwrap();
        for member in members {
            db.add_member(chat, *member).unwrap();
        }
        chat
    }

    /// The end-to-end scenario: chat C1 has members [A, B, D]. A sends "hi".
    /// B is live and focused on C1 and receives `new_message`; D is offline
    /// and gets a durable notification, drained exactly once on pull.
    #[tokio::test]
    async fn scenario_live_and_offline_recipients() {
        let h = harness();
        let a = seed_user(&h, "A");
        let b = seed_user(&h, "B");
        let d = seed_user(&h, "D");
        let chat = seed_chat(&h, &[a, b, d]);

        // A's sending device.
        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let origin = h.registry.register(ConnectionHandle::new(a, "A", a_tx));

        // B connects and focuses the chat.
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let b_conn = h.registry.register(ConnectionHandle::new(b, "B", b_tx));
        {
            let db = h.backend.db.lock().unwrap();
            db.create_session(b, "tok-b", u64::MAX).unwrap();
            db.bind_connection(b, "tok-b", &b_conn, 1).unwrap();
            db.set_focus(b, "tok-b", Some(chat)).unwrap();
        }

        let outcome = h
            .router
            .send_message(a, "A", &origin, &chat.to_string(), "hi")
            .await
            .unwrap();

        assert_eq!(outcome.live_deliveries, 1);
        assert_eq!(outcome.queued, 1);
        assert!(!outcome.degraded);

        // B saw the message live, marked in-focus.
        let event = b_rx.try_recv().unwrap();
        match event {
            Event::NewMessage { content, .. } => assert_eq!(content, "hi"),
            other => panic!("expected new_message, got {:?}", other),
        }

        // D drains the queue once; a second pull is empty.
        let pulled = h.backend.pull_and_mark_delivered(d).await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].message_id, outcome.message.id);
        assert_eq!(pulled[0].sender_name, "A");
        assert!(h
            .backend
            .pull_and_mark_delivered(d)
            .await
            .unwrap()
            .is_empty());
    }

    /// A binding whose connection silently died converges to cleared after
    /// one reconciliation pass against the real registry predicate.
    #[tokio::test]
    async fn scenario_reconciliation_convergence() {
        let h = harness();
        let b = seed_user(&h, "B");
        {
            let db = h.backend.db.lock().unwrap();
            db.create_session(b, "tok-b", u64::MAX).unwrap();
        }

        let manager = SessionManager::new(
            Arc::new(h.backend.clone()),
            Arc::new(h.backend.clone()),
        );

        // Connection registered, bound, then dropped without a disconnect.
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let b_conn = h.registry.register(ConnectionHandle::new(b, "B", b_tx));
        manager.bind_connection(b, "tok-b", &b_conn).await.unwrap();
        drop(b_rx);
        h.registry.unregister(&b_conn);

        let registry = h.registry.clone();
        let cleared = manager
            .reconcile_stale(|id| registry.is_live(id))
            .await
            .unwrap();
        assert_eq!(cleared, 1);

        // Binding and focus are now null: the next fanout treats B offline.
        assert!(h.backend.focused_sessions(b).await.unwrap().is_empty());
    }

    /// Rejected sends leave no message rows behind.
    #[tokio::test]
    async fn rejection_persists_nothing() {
        let h = harness();
        let a = seed_user(&h, "A");
        let b = seed_user(&h, "B");
        let chat = seed_chat(&h, &[b]); // A is not a member

        let (a_tx, _a_rx) = mpsc::unbounded_channel();
        let origin = h.registry.register(ConnectionHandle::new(a, "A", a_tx));

        let err = h
            .router
            .send_message(a, "A", &origin, &chat.to_string(), "hi")
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        assert!(h.backend.list_messages(chat).await.unwrap().is_empty());
    }
}
