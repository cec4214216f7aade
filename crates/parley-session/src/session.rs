//! Session types: the registry's record of one bound identity.

use std::time::Instant;

use parley_protocol::Identity;

use crate::ConnectionHandle;

/// Configuration for the session registry.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on simultaneously bound identities. New identities are
    /// rejected once it is reached; an identity that is already bound can
    /// always supersede itself.
    ///
    /// Default: 10 000. Set to 0 for no limit.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
        }
    }
}

/// A live binding between an identity and one connection.
///
/// Sessions exist only in memory. They are created on a successful
/// register or login and removed on logout, disconnect, or when another
/// connection takes the identity over.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub handle: ConnectionHandle,
    /// When the binding was made. Used for logging session lifetimes.
    pub since: Instant,
}
