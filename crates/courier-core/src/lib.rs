//! # courier-core
//!
//! Connection registry, session bookkeeping and fanout routing for the
//! Courier chat engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - Process-wide index of live connections per user
//! - **FanoutRouter** - Per-recipient delivery decisions for new messages
//! - **SessionManager** - Durable session/focus bookkeeping and reconciliation
//! - **Collaborator traits** - Membership, message, notification and session
//!   persistence, implemented elsewhere and injected here
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────────┐
//! │  Connection │────▶│ FanoutRouter │────▶│ live emit (N dev) │
//! └─────────────┘     └──────────────┘     └───────────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │ notification │
//!                     │    queue     │
//!                     └──────────────┘
//! ```
//!
//! The crate performs no I/O of its own: every durable operation goes through
//! the traits in [`traits`], so the router is testable with in-memory doubles.

pub mod fanout;
pub mod registry;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod testutil;

pub use fanout::{FanoutConfig, FanoutRouter, NotifyRetryPolicy, SendError, SendOutcome};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use session::SessionManager;
pub use traits::{
    BackendError, MembershipOracle, MessageStore, NotificationStore, SessionStore,
};
pub use types::{ChatId, ChatMessage, ConnectionId, MessageId, UserId};
