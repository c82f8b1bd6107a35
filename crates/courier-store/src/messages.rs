//! The message log.

use rusqlite::params;
use uuid::Uuid;

use courier_core::types::{ChatId, ChatMessage, UserId};

use crate::chats::parse_uuid;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Persist one message. The store assigns the sequence number; the
    /// caller supplies the creation timestamp so clock handling stays in one
    /// place.
    pub fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
        created_at_ms: u64,
    ) -> Result<ChatMessage> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                chat_id.to_string(),
                sender_id.to_string(),
                content,
                created_at_ms as i64,
            ],
        )?;
        let seq = self.conn().last_insert_rowid();

        Ok(ChatMessage {
            id,
            chat_id,
            sender_id,
            content: content.to_string(),
            created_at_ms,
            seq,
        })
    }

    /// Chat history oldest first, ordered by `(created_at_ms, seq)` so
    /// same-millisecond messages keep a stable order.
    pub fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, content, created_at_ms, seq
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at_ms, seq",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let created_at_ms: i64 = row.get(4)?;

    Ok(ChatMessage {
        id: parse_uuid(id, 0)?,
        chat_id: parse_uuid(chat_id, 1)?,
        sender_id: parse_uuid(sender_id, 2)?,
        content: row.get(3)?,
        created_at_ms: created_at_ms as u64,
        seq: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_chat(db: &Database) -> (ChatId, UserId) {
        let user = Uuid::new_v4();
        db.upsert_user(user, "Alice").unwrap();
        let chat = db.create_chat(None).unwrap();
        db.add_member(chat, user).unwrap();
        (chat, user)
    }

    #[test]
    fn insert_assigns_monotonic_seq() {
        let db = Database::open_in_memory().unwrap();
        let (chat, user) = seeded_chat(&db);

        let m1 = db.insert_message(chat, user, "one", 100).unwrap();
        let m2 = db.insert_message(chat, user, "two", 100).unwrap();
        assert!(m2.seq > m1.seq);
    }

    #[test]
    fn history_ordered_by_time_then_seq() {
        let db = Database::open_in_memory().unwrap();
        let (chat, user) = seeded_chat(&db);

        // Same-millisecond messages: insertion order must be preserved.
        db.insert_message(chat, user, "first", 100).unwrap();
        db.insert_message(chat, user, "second", 100).unwrap();
        db.insert_message(chat, user, "earlier", 50).unwrap();

        let history = db.list_messages(chat).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier", "first", "second"]);
    }

    #[test]
    fn history_scoped_to_chat() {
        let db = Database::open_in_memory().unwrap();
        let (chat, user) = seeded_chat(&db);
        let other = db.create_chat(None).unwrap();
        db.add_member(other, user).unwrap();

        db.insert_message(chat, user, "here", 1).unwrap();
        db.insert_message(other, user, "there", 2).unwrap();

        assert_eq!(db.list_messages(chat).unwrap().len(), 1);
    }
}
