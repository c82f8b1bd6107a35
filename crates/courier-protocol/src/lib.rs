//! # courier-protocol
//!
//! Wire protocol definitions for the Courier realtime chat engine.
//!
//! This crate defines the binary protocol spoken between chat clients and the
//! Courier server: the event types exchanged over a connection and the
//! length-prefixed MessagePack codec that frames them.
//!
//! ## Event Types
//!
//! - `Connect` / `Connected` - Connection handshake
//! - `ChatFocus` - Declare which chat a device currently has open
//! - `SendMessage` - Submit a message to a chat
//! - `NewMessage` / `Notification` - Live deliveries (in-focus vs background)
//! - `SendAck` / `Error` - Acknowledgments and errors
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{Event, codec};
//!
//! let event = Event::send_message("7a1c6a2e-9d76-4a6d-9c1e-3f8b2a5d0c11", "hello");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError};
pub use events::Event;

/// Current protocol version, advertised in the `connected` handshake reply.
pub const PROTOCOL_VERSION: u8 = 1;
