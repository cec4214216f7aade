//! Error types for the session layer.

use parley_protocol::Identity;

/// Errors that can occur during session management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session exists for the given identity.
    #[error("identity {0} is not online")]
    NotFound(Identity),

    /// Identity `0` means "server/unaddressed" and cannot be bound.
    #[error("identity 0 is reserved")]
    ReservedIdentity,

    /// The registry already holds the configured maximum of sessions.
    #[error("server is full ({0} sessions)")]
    CapacityReached(usize),
}
