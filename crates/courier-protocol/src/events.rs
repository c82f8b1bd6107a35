//! Event types for the Courier protocol.
//!
//! Events are the fundamental unit of communication between a chat client and
//! the server. Each event is serialized using MessagePack; field names follow
//! the camelCase convention of the original wire protocol so existing clients
//! interoperate unchanged.

use serde::{Deserialize, Serialize};

/// A protocol event.
///
/// Inbound events (`connect`, `chatID`, `send_message`, `ping`) are sent by
/// clients; the remainder are produced by the server. Disconnection has no
/// event of its own: closing the transport stream is the disconnect signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Authenticate a freshly opened connection.
    #[serde(rename = "connect")]
    Connect {
        /// Opaque session token issued at sign-in.
        token: String,
    },

    /// Handshake reply once the connection is authenticated and registered.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended keepalive interval in milliseconds.
        heartbeat_ms: u32,
    },

    /// Declare which chat this connection currently has in focus.
    #[serde(rename = "chatID", rename_all = "camelCase")]
    ChatFocus {
        /// The focused chat, or empty to clear focus.
        chat_id: String,
    },

    /// Submit a message to a chat.
    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        /// Target chat.
        chat_id: String,
        /// Message body.
        content: String,
    },

    /// Live delivery to a connection focused on the message's chat.
    #[serde(rename = "new_message", rename_all = "camelCase")]
    NewMessage {
        id: String,
        chat_id: String,
        sender_id: String,
        sender_name: String,
        content: String,
        created_at: u64,
    },

    /// Live delivery to a connection *not* focused on the message's chat.
    ///
    /// Same payload as `new_message` plus `isActiveChat: false`, so the
    /// consuming layer renders a toast rather than an inline message.
    #[serde(rename = "notification", rename_all = "camelCase")]
    Notification {
        id: String,
        chat_id: String,
        sender_id: String,
        sender_name: String,
        content: String,
        created_at: u64,
        is_active_chat: bool,
    },

    /// Acknowledgment of a successful send, back to the originating
    /// connection only.
    #[serde(rename = "send_ack", rename_all = "camelCase")]
    SendAck {
        /// Id of the persisted message.
        message_id: String,
        /// Number of live delivery events emitted.
        delivered_live: u32,
        /// Number of durable notification records written.
        queued: u32,
        /// True when the message persisted but the notification batch did
        /// not; affected recipients will see the message via chat history.
        degraded: bool,
    },

    /// Error report to the originating connection.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Event {
    /// Get the wire name of the event, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connect { .. } => "connect",
            Event::Connected { .. } => "connected",
            Event::ChatFocus { .. } => "chatID",
            Event::SendMessage { .. } => "send_message",
            Event::NewMessage { .. } => "new_message",
            Event::Notification { .. } => "notification",
            Event::SendAck { .. } => "send_ack",
            Event::Error { .. } => "error",
            Event::Ping { .. } => "ping",
            Event::Pong { .. } => "pong",
        }
    }

    /// Create a new Connect event.
    #[must_use]
    pub fn connect(token: impl Into<String>) -> Self {
        Event::Connect {
            token: token.into(),
        }
    }

    /// Create a new Connected event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat_ms: u32) -> Self {
        Event::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat_ms,
        }
    }

    /// Create a new ChatFocus event.
    #[must_use]
    pub fn chat_focus(chat_id: impl Into<String>) -> Self {
        Event::ChatFocus {
            chat_id: chat_id.into(),
        }
    }

    /// Create a new SendMessage event.
    #[must_use]
    pub fn send_message(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Event::SendMessage {
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }

    /// Create a new Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    /// Create a new Pong event echoing a ping timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Event::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::connect("tok").name(), "connect");
        assert_eq!(Event::chat_focus("c1").name(), "chatID");
        assert_eq!(Event::send_message("c1", "hi").name(), "send_message");
        assert_eq!(Event::error("nope").name(), "error");
    }

    #[test]
    fn test_wire_field_names() {
        let event = Event::Notification {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            content: "hi".into(),
            created_at: 42,
            is_active_chat: false,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["senderName"], "Alice");
        assert_eq!(json["isActiveChat"], false);
    }

    #[test]
    fn test_focus_event_wire_name() {
        let json = serde_json::to_value(Event::chat_focus("c9")).unwrap();
        assert_eq!(json["type"], "chatID");
        assert_eq!(json["chatId"], "c9");
    }
}
