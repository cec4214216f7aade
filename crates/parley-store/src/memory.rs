//! In-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use parley_protocol::Identity;

use crate::{PersistenceGateway, StoreError, StoredMessage, User};

/// The record set shared by both store implementations.
#[derive(Debug, Default)]
pub(crate) struct Records {
    pub(crate) users: HashMap<Identity, User>,
    pub(crate) messages: Vec<StoredMessage>,
}

impl Records {
    /// Inserts a user unless the identity is taken.
    pub(crate) fn insert_user(&mut self, id: Identity, name: &str, password: &str) -> bool {
        if self.users.contains_key(&id) {
            return false;
        }
        self.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                password: password.to_string(),
            },
        );
        true
    }

    pub(crate) fn verify(&self, id: Identity, password: &str) -> Option<User> {
        self.users
            .get(&id)
            .filter(|user| user.password == password)
            .cloned()
    }

    pub(crate) fn names(&self) -> BTreeMap<Identity, String> {
        self.users
            .values()
            .map(|user| (user.id, user.name.clone()))
            .collect()
    }

    pub(crate) fn history(&self, a: Identity, b: Identity) -> Vec<StoredMessage> {
        self.messages
            .iter()
            .filter(|msg| msg.is_between(a, b))
            .cloned()
            .collect()
    }
}

/// A [`PersistenceGateway`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl PersistenceGateway for MemoryStore {
    fn create_user(
        &self,
        id: Identity,
        name: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.records()?.insert_user(id, name, password))
    }

    fn verify(
        &self,
        id: Identity,
        password: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.records()?.verify(id, password))
    }

    fn list_users(&self) -> Result<BTreeMap<Identity, String>, StoreError> {
        Ok(self.records()?.names())
    }

    fn append_message(
        &self,
        sender: Identity,
        receiver: Identity,
        content: &str,
    ) -> Result<(), StoreError> {
        self.records()?.messages.push(StoredMessage {
            sender,
            receiver,
            content: content.to_string(),
        });
        Ok(())
    }

    fn history(
        &self,
        a: Identity,
        b: Identity,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.records()?.history(a, b))
    }
}
