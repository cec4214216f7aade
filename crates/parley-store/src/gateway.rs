//! The persistence interface the routing core depends on.
//!
//! The trait is synchronous. Every operation is a short critical section
//! over in-memory records, plus a small write for the file store. The
//! server runs each call on tokio's blocking pool, so a slow disk never
//! stalls other connections.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parley_protocol::Identity;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A registered account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Identity,
    pub name: String,
    pub password: String,
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub sender: Identity,
    pub receiver: Identity,
    pub content: String,
}

impl StoredMessage {
    /// Returns `true` if this message was exchanged between `a` and `b`
    /// in either direction.
    pub fn is_between(&self, a: Identity, b: Identity) -> bool {
        (self.sender == a && self.receiver == b)
            || (self.sender == b && self.receiver == a)
    }
}

/// Durable user records and message history.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one store is shared by every
/// connection task for the lifetime of the server.
pub trait PersistenceGateway: Send + Sync + 'static {
    /// Creates a user. Returns `Ok(false)` if the identity is taken.
    fn create_user(
        &self,
        id: Identity,
        name: &str,
        password: &str,
    ) -> Result<bool, StoreError>;

    /// Returns the user if `password` matches, `Ok(None)` otherwise
    /// (unknown identity and wrong password are indistinguishable).
    fn verify(
        &self,
        id: Identity,
        password: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Returns every registered user's name, ordered by identity.
    fn list_users(&self) -> Result<BTreeMap<Identity, String>, StoreError>;

    /// Appends a message to the history.
    fn append_message(
        &self,
        sender: Identity,
        receiver: Identity,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Returns every message exchanged between `a` and `b`, oldest
    /// first. Each call re-reads the history; it is not a live stream.
    fn history(
        &self,
        a: Identity,
        b: Identity,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Lets callers keep their own handle to a store that the server owns.
impl<T: PersistenceGateway> PersistenceGateway for Arc<T> {
    fn create_user(
        &self,
        id: Identity,
        name: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        (**self).create_user(id, name, password)
    }

    fn verify(
        &self,
        id: Identity,
        password: &str,
    ) -> Result<Option<User>, StoreError> {
        (**self).verify(id, password)
    }

    fn list_users(&self) -> Result<BTreeMap<Identity, String>, StoreError> {
        (**self).list_users()
    }

    fn append_message(
        &self,
        sender: Identity,
        receiver: Identity,
        content: &str,
    ) -> Result<(), StoreError> {
        (**self).append_message(sender, receiver, content)
    }

    fn history(
        &self,
        a: Identity,
        b: Identity,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        (**self).history(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_debug_redacts_password() {
        let user = User {
            id: Identity(1),
            name: "alice".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{user:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_stored_message_is_between_both_directions() {
        let msg = StoredMessage {
            sender: Identity(1),
            receiver: Identity(2),
            content: "hi".into(),
        };
        assert!(msg.is_between(Identity(1), Identity(2)));
        assert!(msg.is_between(Identity(2), Identity(1)));
        assert!(!msg.is_between(Identity(1), Identity(3)));
    }
}
