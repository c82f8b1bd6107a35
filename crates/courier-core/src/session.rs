//! Session bookkeeping over the durable session store.
//!
//! The [`SessionManager`] wraps the raw [`SessionStore`] with the policy the
//! rest of the system relies on: membership-gated focus changes, logged (not
//! surfaced) bind misses, and the stale-connection reconciliation pass that
//! restores the registry/store invariant when a disconnect event was lost.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::traits::{BackendError, MembershipOracle, SessionStore};
use crate::types::{now_ms, AuthenticatedSession, ChatId, ConnectionId, UserId};

/// Durable session bookkeeping and reconciliation.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    membership: Arc<dyn MembershipOracle>,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, membership: Arc<dyn MembershipOracle>) -> Self {
        Self {
            sessions,
            membership,
        }
    }

    /// Resolve a session token to an authenticated identity, if the token
    /// matches an unexpired session. Credential issuance itself happens
    /// outside this subsystem.
    pub async fn authenticate(
        &self,
        token: &str,
    ) -> Result<Option<AuthenticatedSession>, BackendError> {
        self.sessions.find_by_token(token, now_ms()).await
    }

    /// Associate a live connection with its durable session.
    ///
    /// A miss (no matching session row) is logged, never surfaced to the
    /// peer; the caller is expected to force-disconnect on `false`.
    pub async fn bind_connection(
        &self,
        user_id: UserId,
        token: &str,
        connection_id: &ConnectionId,
    ) -> Result<bool, BackendError> {
        let bound = self
            .sessions
            .bind_connection(user_id, token, connection_id, now_ms())
            .await?;

        if bound {
            debug!(user = %user_id, connection = %connection_id, "Session bound");
        } else {
            warn!(user = %user_id, connection = %connection_id, "No durable session to bind");
        }
        Ok(bound)
    }

    /// Record which chat a session has in focus.
    ///
    /// The change is conditioned on the user being a member of that chat; a
    /// failed check leaves focus unchanged and returns false.
    pub async fn set_focus(
        &self,
        user_id: UserId,
        token: &str,
        chat_id: ChatId,
    ) -> Result<bool, BackendError> {
        if !self.membership.is_member(chat_id, user_id).await? {
            debug!(user = %user_id, chat = %chat_id, "Focus refused: not a member");
            return Ok(false);
        }

        self.sessions.set_focus(user_id, token, Some(chat_id)).await?;
        debug!(user = %user_id, chat = %chat_id, "Focus set");
        Ok(true)
    }

    /// Clear a session's focus without touching its correlation key.
    pub async fn clear_focus(&self, user_id: UserId, token: &str) -> Result<(), BackendError> {
        self.sessions.set_focus(user_id, token, None).await
    }

    /// On disconnect: null both correlation key and focus, so a later
    /// message cannot mistake this session for live.
    pub async fn clear_connection(&self, user_id: UserId, token: &str) -> Result<(), BackendError> {
        self.sessions.clear_connection(user_id, token).await?;
        debug!(user = %user_id, "Session connection cleared");
        Ok(())
    }

    /// Delete all sessions expired as of now. Run periodically.
    pub async fn reap_expired(&self) -> Result<u64, BackendError> {
        let reaped = self.sessions.reap_expired(now_ms()).await?;
        if reaped > 0 {
            info!(reaped, "Expired sessions reaped");
        }
        Ok(reaped)
    }

    /// One stale-connection reconciliation pass.
    ///
    /// Snapshots a cutoff, lists bindings with a correlation key written at
    /// or before the cutoff, probes each against the supplied liveness
    /// predicate, and clears key + focus for the dead ones. A binding
    /// refreshed after the snapshot keeps its fresh correlation key: the
    /// store only clears rows that still carry the stale connection id.
    /// Idempotent and safe to run concurrently with live traffic.
    pub async fn reconcile_stale<F>(&self, is_live: F) -> Result<u64, BackendError>
    where
        F: Fn(&ConnectionId) -> bool + Send + Sync,
    {
        let cutoff = now_ms();
        let candidates = self.sessions.stale_candidates(cutoff).await?;

        let dead: Vec<_> = candidates
            .into_iter()
            .filter(|binding| !is_live(&binding.connection_id))
            .collect();

        if dead.is_empty() {
            return Ok(0);
        }

        let cleared = self.sessions.clear_bindings(&dead).await?;
        info!(cleared, "Stale session bindings reconciled");
        Ok(cleared)
    }
}
