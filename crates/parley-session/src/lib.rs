//! Session management for Parley.
//!
//! This crate answers one question for the rest of the server: "who is
//! online, and through which connection?"
//!
//! 1. **Handles** — a [`ConnectionHandle`] is the only way other tasks
//!    reach a connection: it enqueues frames on the connection's write
//!    queue and can ask the connection to close.
//! 2. **Registry** — the [`SessionRegistry`] binds each [`Identity`] to
//!    at most one handle and enforces the supersede policy when two
//!    connections claim the same identity.
//!
//! # How it fits in the stack
//!
//! ```text
//! Negotiation / Handler (above)  ← look up identities, deliver frames
//!     ↕
//! Session Layer (this crate)     ← identity → connection binding
//!     ↕
//! Protocol + Transport (below)   ← Identity, Message, ConnectionId
//! ```
//!
//! [`Identity`]: parley_protocol::Identity

mod error;
mod handle;
mod registry;
mod session;

pub use error::SessionError;
pub use handle::{ConnectionHandle, Outbound, OutboundReceiver};
pub use registry::{Registration, SessionRegistry};
pub use session::{Session, SessionConfig};
