//! Chat negotiation for Parley.
//!
//! Two identities agree to chat through a three-message handshake:
//!
//! ```text
//! A ──C_C──→ server ──C_C──→ B        (request recorded as pending)
//! A ←─C_A/C_D── server ←─C_A/C_D── B  (request resolved and removed)
//! ```
//!
//! Acceptance is advisory only. It creates no lasting "paired" state:
//! message relay addresses receivers explicitly whether or not a
//! negotiation took place.
//!
//! # Key types
//!
//! - [`ChatNegotiation`] — the pending-request table and its operations
//! - [`PendingChatRequest`] — one outstanding request
//! - [`NegotiationConfig`] — request time-to-live

mod config;
mod error;
mod negotiation;

pub use config::NegotiationConfig;
pub use error::NegotiationError;
pub use negotiation::{ChatNegotiation, PendingChatRequest, Resolution};
