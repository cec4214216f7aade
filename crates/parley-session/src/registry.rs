//! The session registry: the single source of truth for "who is online".
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself; it is a plain
//! `HashMap`. The server keeps it next to the chat-negotiation table
//! behind one mutex, so a register, lookup, or unregister is always
//! observed whole, and negotiation decisions see the same snapshot.

use std::collections::HashMap;
use std::time::Instant;

use parley_protocol::Identity;
use parley_transport::ConnectionId;

use crate::{ConnectionHandle, Session, SessionConfig, SessionError};

/// Outcome of [`SessionRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    /// The identity is now bound to the new connection.
    Accepted,
    /// The identity was bound to another connection. That connection has
    /// been told to close; its handle is returned for logging.
    Superseded(ConnectionHandle),
    /// The binding was refused; the reason says why.
    Rejected(SessionError),
}

/// Maps each identity to exactly one live connection.
///
/// ## Lifecycle
///
/// ```text
/// register() ──→ [bound] ──→ unregister() / release()
///                   │
///                   └── register() from another connection
///                         → old connection closed, new one bound
/// ```
///
/// Supersede (rather than reject) is the policy for duplicate identities:
/// identities are self-chosen, and a dead socket that has not been
/// noticed yet must not lock its owner out.
pub struct SessionRegistry {
    sessions: HashMap<Identity, Session>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    /// Binds `identity` to `handle`, superseding any previous binding.
    pub fn register(
        &mut self,
        identity: Identity,
        handle: ConnectionHandle,
    ) -> Registration {
        if identity.is_server() {
            return Registration::Rejected(SessionError::ReservedIdentity);
        }

        if let Some(existing) = self.sessions.get(&identity) {
            if existing.handle.id() == handle.id() {
                // Same connection registering twice is a no-op.
                return Registration::Accepted;
            }
        } else if self.config.max_sessions > 0
            && self.sessions.len() >= self.config.max_sessions
        {
            tracing::warn!(
                %identity,
                max = self.config.max_sessions,
                "session capacity reached"
            );
            return Registration::Rejected(SessionError::CapacityReached(
                self.config.max_sessions,
            ));
        }

        let conn_id = handle.id();
        let previous = self.sessions.insert(
            identity,
            Session {
                identity,
                handle,
                since: Instant::now(),
            },
        );

        match previous {
            Some(old) => {
                old.handle.close();
                tracing::info!(
                    %identity,
                    old_conn = %old.handle.id(),
                    new_conn = %conn_id,
                    "session superseded"
                );
                Registration::Superseded(old.handle)
            }
            None => {
                tracing::info!(%identity, %conn_id, "session registered");
                Registration::Accepted
            }
        }
    }

    /// Returns the handle bound to `identity`.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the identity is not online.
    pub fn lookup(
        &self,
        identity: Identity,
    ) -> Result<&ConnectionHandle, SessionError> {
        self.sessions
            .get(&identity)
            .map(|session| &session.handle)
            .ok_or(SessionError::NotFound(identity))
    }

    /// Removes the binding for `identity`. Idempotent.
    pub fn unregister(&mut self, identity: Identity) -> Option<Session> {
        let removed = self.sessions.remove(&identity);
        if let Some(session) = &removed {
            tracing::info!(
                %identity,
                conn_id = %session.handle.id(),
                online_secs = session.since.elapsed().as_secs(),
                "session ended"
            );
        }
        removed
    }

    /// Removes the binding for `identity` only if it still belongs to
    /// `conn_id`. Returns whether a binding was removed.
    ///
    /// Connection cleanup uses this instead of [`unregister`](Self::unregister):
    /// a superseded connection tearing down must not unbind the
    /// connection that replaced it.
    pub fn release(&mut self, identity: Identity, conn_id: ConnectionId) -> bool {
        let owned = self
            .sessions
            .get(&identity)
            .is_some_and(|session| session.handle.id() == conn_id);
        if owned {
            self.unregister(identity);
        }
        owned
    }

    /// Returns `true` if `identity` is bound to a connection.
    pub fn is_online(&self, identity: Identity) -> bool {
        self.sessions.contains_key(&identity)
    }

    /// Returns the online identities in ascending order.
    pub fn online(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Looks up a session record by identity.
    pub fn get(&self, identity: &Identity) -> Option<&Session> {
        self.sessions.get(identity)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nobody is online.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================
