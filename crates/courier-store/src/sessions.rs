//! Durable session bindings.
//!
//! One row per authenticated device session, keyed `(user_id,
//! session_token)`. Rows are created at sign-in by the identity service;
//! this subsystem updates the live-connection correlation key and the
//! focused chat, reaps expired rows, and reconciles stale bindings.

use rusqlite::{params, OptionalExtension};

use courier_core::types::{
    AuthenticatedSession, ChatId, ConnectionId, SessionFocus, StaleBinding, UserId,
};

use crate::chats::parse_uuid;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert a fresh session row. In production this happens in the
    /// identity service at sign-in; the store exposes it for tests and
    /// seeding.
    pub fn create_session(
        &self,
        user_id: UserId,
        session_token: &str,
        expires_at_ms: u64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_sessions (user_id, session_token, expires_at_ms)
             VALUES (?1, ?2, ?3)",
            params![user_id.to_string(), session_token, expires_at_ms as i64],
        )?;
        Ok(())
    }

    /// Attach a live connection to the session matched by `(user_id,
    /// token)`. Returns false when no row matched.
    pub fn bind_connection(
        &self,
        user_id: UserId,
        token: &str,
        connection_id: &ConnectionId,
        bound_at_ms: u64,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE user_sessions
             SET connection_id = ?3, bound_at_ms = ?4
             WHERE user_id = ?1 AND session_token = ?2",
            params![
                user_id.to_string(),
                token,
                connection_id.as_str(),
                bound_at_ms as i64,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Record (or clear, with `None`) the focused chat for a session.
    pub fn set_focus(&self, user_id: UserId, token: &str, chat_id: Option<ChatId>) -> Result<()> {
        self.conn().execute(
            "UPDATE user_sessions
             SET focus_chat_id = ?3
             WHERE user_id = ?1 AND session_token = ?2",
            params![
                user_id.to_string(),
                token,
                chat_id.map(|c| c.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Null both the correlation key and focus on disconnect.
    pub fn clear_connection(&self, user_id: UserId, token: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE user_sessions
             SET connection_id = NULL, focus_chat_id = NULL, bound_at_ms = NULL
             WHERE user_id = ?1 AND session_token = ?2",
            params![user_id.to_string(), token],
        )?;
        Ok(())
    }

    /// All of a user's sessions that claim a live connection, with focus.
    pub fn focused_sessions(&self, user_id: UserId) -> Result<Vec<SessionFocus>> {
        let mut stmt = self.conn().prepare(
            "SELECT connection_id, focus_chat_id
             FROM user_sessions
             WHERE user_id = ?1 AND connection_id IS NOT NULL",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let connection_id: String = row.get(0)?;
            let focus: Option<String> = row.get(1)?;
            let focus_chat_id = match focus {
                Some(raw) => Some(parse_uuid(raw, 1)?),
                None => None,
            };
            Ok(SessionFocus {
                connection_id: ConnectionId::new(connection_id),
                focus_chat_id,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Delete sessions expired at or before `now_ms`; returns the count.
    pub fn reap_expired(&self, now_ms: u64) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM user_sessions WHERE expires_at_ms <= ?1",
            params![now_ms as i64],
        )?;
        Ok(affected as u64)
    }

    /// Sessions holding a correlation key written at or before `cutoff_ms`.
    pub fn stale_candidates(&self, cutoff_ms: u64) -> Result<Vec<StaleBinding>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, session_token, connection_id, bound_at_ms
             FROM user_sessions
             WHERE connection_id IS NOT NULL AND bound_at_ms <= ?1",
        )?;

        let rows = stmt.query_map(params![cutoff_ms as i64], |row| {
            let user_id: String = row.get(0)?;
            let connection_id: String = row.get(2)?;
            let bound_at_ms: i64 = row.get(3)?;
            Ok(StaleBinding {
                user_id: parse_uuid(user_id, 0)?,
                session_token: row.get(1)?,
                connection_id: ConnectionId::new(connection_id),
                bound_at_ms: bound_at_ms as u64,
            })
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(candidates)
    }

    /// Clear key and focus for the given bindings. A row is only touched
    /// while it still carries the listed connection id, so a binding
    /// refreshed after the candidate snapshot survives the pass.
    pub fn clear_bindings(&self, bindings: &[StaleBinding]) -> Result<u64> {
        let mut cleared = 0u64;
        for binding in bindings {
            cleared += self.conn().execute(
                "UPDATE user_sessions
                 SET connection_id = NULL, focus_chat_id = NULL, bound_at_ms = NULL
                 WHERE user_id = ?1 AND session_token = ?2 AND connection_id = ?3",
                params![
                    binding.user_id.to_string(),
                    binding.session_token,
                    binding.connection_id.as_str(),
                ],
            )? as u64;
        }
        Ok(cleared)
    }

    /// Resolve a session token to an identity, provided the session is
    /// unexpired. Joins the display name so it can be cached at
    /// authentication time.
    pub fn find_by_token(&self, token: &str, now_ms: u64) -> Result<Option<AuthenticatedSession>> {
        let row = self
            .conn()
            .query_row(
                "SELECT s.user_id, s.session_token, u.username
                 FROM user_sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.session_token = ?1 AND s.expires_at_ms > ?2
                 LIMIT 1",
                params![token, now_ms as i64],
                |row| {
                    let user_id: String = row.get(0)?;
                    Ok(AuthenticatedSession {
                        user_id: parse_uuid(user_id, 0)?,
                        session_token: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
