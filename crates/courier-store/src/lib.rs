//! # courier-store
//!
//! Durable SQLite persistence for the Courier chat engine: the session
//! table, the message log, chat membership and the per-user notification
//! queue.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and exposes typed
//! CRUD helpers split by table. [`SqliteBackend`] bridges those blocking
//! helpers onto the async collaborator traits from `courier-core` via
//! `spawn_blocking`, which is how the server consumes this crate.

pub mod backend;
pub mod database;
pub mod error;
pub mod migrations;

mod chats;
mod messages;
mod notifications;
mod sessions;

pub use backend::SqliteBackend;
pub use database::Database;
pub use error::{Result, StoreError};
