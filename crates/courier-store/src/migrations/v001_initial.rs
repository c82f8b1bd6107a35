//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `users`, `chats`, `chat_members`,
//! `messages`, `notification_queue` and `user_sessions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (owned by the identity service; mirrored here for joins)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id       TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    username TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id   TEXT PRIMARY KEY NOT NULL,           -- UUID v4
    name TEXT
);

-- ----------------------------------------------------------------
-- Chat members; rowid preserves insertion order
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id TEXT NOT NULL,                    -- FK -> chats(id)
    user_id TEXT NOT NULL,                    -- FK -> users(id)

    UNIQUE (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_chat ON chat_members(chat_id);

-- ----------------------------------------------------------------
-- Messages; seq is the stable secondary sort key
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,       -- UUID v4
    chat_id       TEXT NOT NULL,              -- FK -> chats(id)
    sender_id     TEXT NOT NULL,              -- FK -> users(id)
    content       TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,           -- epoch milliseconds

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat
    ON messages(chat_id, created_at_ms);

-- ----------------------------------------------------------------
-- Notification queue: one row per undelivered (recipient, message)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notification_queue (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT NOT NULL,              -- FK -> users(id)
    chat_id       TEXT NOT NULL,              -- FK -> chats(id)
    message_id    TEXT NOT NULL,              -- FK -> messages(id)
    is_delivered  INTEGER NOT NULL DEFAULT 0,
    created_at_ms INTEGER NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_notification_queue_user
    ON notification_queue(user_id, is_delivered);

-- ----------------------------------------------------------------
-- User sessions: durable device bindings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_sessions (
    user_id       TEXT NOT NULL,              -- FK -> users(id)
    session_token TEXT NOT NULL,
    connection_id TEXT,                       -- live-connection correlation key
    focus_chat_id TEXT,                       -- chat currently in focus
    bound_at_ms   INTEGER,                    -- when connection_id was written
    expires_at_ms INTEGER NOT NULL,

    PRIMARY KEY (user_id, session_token),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_user_sessions_token
    ON user_sessions(session_token);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
