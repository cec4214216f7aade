//! File-backed store.
//!
//! Two files, both loaded completely at [`FileStore::open`]:
//!
//! - **users** — a JSON array of [`User`] records, rewritten whenever an
//!   account is created (write to a sibling temp file, then rename, so a
//!   crash never leaves half a document behind).
//! - **messages** — one JSON [`StoredMessage`] per line, appended.
//!
//! A missing file is an empty store. Reads are served from memory.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use parley_protocol::Identity;

use crate::memory::Records;
use crate::{PersistenceGateway, StoreError, StoredMessage, User};

/// A [`PersistenceGateway`] persisted to two files on disk.
#[derive(Debug)]
pub struct FileStore {
    users_path: PathBuf,
    messages_path: PathBuf,
    records: Mutex<Records>,
}

impl FileStore {
    /// Opens (or starts) a store backed by the given files.
    ///
    /// # Errors
    /// [`StoreError::Io`] if a file exists but cannot be read, and
    /// [`StoreError::Corrupt`] if it does not parse.
    pub fn open(
        users_path: impl Into<PathBuf>,
        messages_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let users_path = users_path.into();
        let messages_path = messages_path.into();

        let mut records = Records::default();
        for user in load_users(&users_path)? {
            records.users.insert(user.id, user);
        }
        records.messages = load_messages(&messages_path)?;

        tracing::info!(
            users = records.users.len(),
            messages = records.messages.len(),
            path = %users_path.display(),
            "file store opened"
        );

        Ok(Self {
            users_path,
            messages_path,
            records: Mutex::new(records),
        })
    }

    /// Opens a store using `users.json` and `messages.jsonl` inside `dir`,
    /// creating the directory if needed.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Self::open(dir.join("users.json"), dir.join("messages.jsonl"))
    }

    fn records(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    fn save_users(&self, records: &Records) -> Result<(), StoreError> {
        let mut users: Vec<&User> = records.users.values().collect();
        users.sort_by_key(|user| user.id);
        let json = serde_json::to_vec_pretty(&users)?;

        let tmp = self.users_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.users_path).map_err(|source| StoreError::Io {
            path: self.users_path.clone(),
            source,
        })
    }

    fn append_line(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let io_err = |source| StoreError::Io {
            path: self.messages_path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.messages_path)
            .map_err(io_err)?;
        file.write_all(&line).map_err(io_err)
    }
}

impl PersistenceGateway for FileStore {
    fn create_user(
        &self,
        id: Identity,
        name: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        let mut records = self.records()?;
        if !records.insert_user(id, name, password) {
            return Ok(false);
        }
        if let Err(e) = self.save_users(&records) {
            // Keep memory and disk in agreement.
            records.users.remove(&id);
            return Err(e);
        }
        Ok(true)
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
        let message = StoredMessage {
            sender,
            receiver,
            content: content.to_string(),
        };
        let mut records = self.records()?;
        self.append_line(&message)?;
        records.messages.push(message);
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

fn load_users(path: &Path) -> Result<Vec<User>, StoreError> {
    let Some(data) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&data).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        line: source.line(),
        source,
    })
}

fn load_messages(path: &Path) -> Result<Vec<StoredMessage>, StoreError> {
    let Some(data) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
