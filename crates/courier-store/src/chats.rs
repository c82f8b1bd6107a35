//! Users, chats and membership.
//!
//! User and chat rows are owned by the surrounding CRUD service; this
//! subsystem reads membership and display names, and writes rows only on
//! behalf of tests and seeding tools.

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use courier_core::types::{ChatId, UserId};

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn upsert_user(&self, user_id: UserId, username: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![user_id.to_string(), username],
        )?;
        Ok(())
    }

    pub fn user_name(&self, user_id: UserId) -> Result<Option<String>> {
        let name = self
            .conn()
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub fn create_chat(&self, name: Option<&str>) -> Result<ChatId> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO chats (id, name) VALUES (?1, ?2)",
            params![id.to_string(), name],
        )?;
        Ok(id)
    }

    pub fn add_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        Ok(())
    }

    /// Full membership in insertion order.
    pub fn chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            parse_uuid(id_str, 0)
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn is_member(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Map a uuid column to [`Uuid`], surfacing parse failures as conversion
/// errors on the column index.
pub(crate) fn parse_uuid(value: String, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.upsert_user(alice, "Alice").unwrap();
        db.upsert_user(bob, "Bob").unwrap();

        let chat = db.create_chat(Some("general")).unwrap();
        db.add_member(chat, alice).unwrap();
        db.add_member(chat, bob).unwrap();

        assert!(db.is_member(chat, alice).unwrap());
        assert!(!db.is_member(chat, Uuid::new_v4()).unwrap());
        // Insertion order is preserved.
        assert_eq!(db.chat_members(chat).unwrap(), vec![alice, bob]);
    }

    #[test]
    fn user_name_lookup() {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        db.upsert_user(alice, "Alice").unwrap();

        assert_eq!(db.user_name(alice).unwrap().as_deref(), Some("Alice"));
        assert_eq!(db.user_name(Uuid::new_v4()).unwrap(), None);
    }
}
