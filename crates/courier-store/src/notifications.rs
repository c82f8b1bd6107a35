//! The durable notification queue.

use rusqlite::params;

use courier_core::types::{NotificationRecord, PendingNotification, UserId};

use crate::chats::parse_uuid;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Append a batch of undelivered-notification rows in one transaction.
    pub fn enqueue_notifications(
        &mut self,
        records: &[NotificationRecord],
        created_at_ms: u64,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO notification_queue (user_id, chat_id, message_id, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.user_id.to_string(),
                    record.chat_id.to_string(),
                    record.message_id.to_string(),
                    created_at_ms as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Return every undelivered notification for the user, oldest first,
    /// enriched with message content and sender name, and mark exactly the
    /// returned rows delivered — all inside one transaction.
    pub fn pull_and_mark_delivered(&mut self, user_id: UserId) -> Result<Vec<PendingNotification>> {
        let tx = self.conn_mut().transaction()?;

        let pulled = {
            let mut stmt = tx.prepare(
                "SELECT n.id, n.chat_id, n.message_id,
                        m.sender_id, u.username, m.content, m.created_at_ms
                 FROM notification_queue n
                 JOIN messages m ON m.id = n.message_id
                 JOIN users u ON u.id = m.sender_id
                 WHERE n.user_id = ?1 AND n.is_delivered = 0
                 ORDER BY n.created_at_ms, n.id",
            )?;

            let rows = stmt.query_map(params![user_id.to_string()], |row| {
                let chat_id: String = row.get(1)?;
                let message_id: String = row.get(2)?;
                let sender_id: String = row.get(3)?;
                let created_at_ms: i64 = row.get(6)?;
                Ok(PendingNotification {
                    id: row.get(0)?,
                    chat_id: parse_uuid(chat_id, 1)?,
                    message_id: parse_uuid(message_id, 2)?,
                    sender_id: parse_uuid(sender_id, 3)?,
                    sender_name: row.get(4)?,
                    content: row.get(5)?,
                    created_at_ms: created_at_ms as u64,
                })
            })?;

            let mut pulled = Vec::new();
            for row in rows {
                pulled.push(row?);
            }
            pulled
        };

        {
            let mut mark = tx.prepare(
                "UPDATE notification_queue SET is_delivered = 1 WHERE id = ?1",
            )?;
            for notification in &pulled {
                mark.execute(params![notification.id])?;
            }
        }

        tx.commit()?;
        Ok(pulled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::types::ChatId;
    use uuid::Uuid;

    struct Seed {
        chat: ChatId,
        alice: UserId,
        dana: UserId,
    }

    fn seed(db: &Database) -> Seed {
        let alice = Uuid::new_v4();
        let dana = Uuid::new_v4();
        db.upsert_user(alice, "Alice").unwrap();
        db.upsert_user(dana, "Dana").unwrap();
        let chat = db.create_chat(Some("general")).unwrap();
        db.add_member(chat, alice).unwrap();
        db.add_member(chat, dana).unwrap();
        Seed { chat, alice, dana }
    }

    #[test]
    fn pull_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let s = seed(&db);
        let message = db.insert_message(s.chat, s.alice, "hi", 100).unwrap();

        db.enqueue_notifications(
            &[NotificationRecord {
                user_id: s.dana,
                chat_id: s.chat,
                message_id: message.id,
            }],
            100,
        )
        .unwrap();

        let first = db.pull_and_mark_delivered(s.dana).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message_id, message.id);
        assert_eq!(first[0].sender_name, "Alice");
        assert_eq!(first[0].content, "hi");

        // Immediately pulling again returns nothing.
        assert!(db.pull_and_mark_delivered(s.dana).unwrap().is_empty());
    }

    #[test]
    fn pull_returns_oldest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let s = seed(&db);
        let m1 = db.insert_message(s.chat, s.alice, "one", 100).unwrap();
        let m2 = db.insert_message(s.chat, s.alice, "two", 200).unwrap();

        db.enqueue_notifications(
            &[NotificationRecord {
                user_id: s.dana,
                chat_id: s.chat,
                message_id: m2.id,
            }],
            200,
        )
        .unwrap();
        db.enqueue_notifications(
            &[NotificationRecord {
                user_id: s.dana,
                chat_id: s.chat,
                message_id: m1.id,
            }],
            100,
        )
        .unwrap();

        let pulled = db.pull_and_mark_delivered(s.dana).unwrap();
        let contents: Vec<_> = pulled.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn pull_scoped_to_user() {
        let mut db = Database::open_in_memory().unwrap();
        let s = seed(&db);
        let message = db.insert_message(s.chat, s.alice, "hi", 100).unwrap();

        db.enqueue_notifications(
            &[NotificationRecord {
                user_id: s.dana,
                chat_id: s.chat,
                message_id: message.id,
            }],
            100,
        )
        .unwrap();

        assert!(db.pull_and_mark_delivered(s.alice).unwrap().is_empty());
        assert_eq!(db.pull_and_mark_delivered(s.dana).unwrap().len(), 1);
    }
}
