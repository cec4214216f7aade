//! User and message persistence for Parley.
//!
//! The routing core treats storage as an external collaborator: it only
//! talks to the [`PersistenceGateway`] trait. Two implementations ship
//! here:
//!
//! - [`MemoryStore`] — everything in a `HashMap`/`Vec`, gone on exit.
//!   Used by tests and by `store.kind = "memory"`.
//! - [`FileStore`] — the same records, loaded from disk at startup and
//!   written back on every change (users as one JSON document, messages
//!   as append-only JSON lines).

mod error;
mod file;
mod gateway;
mod memory;

pub use error::StoreError;
pub use file::FileStore;
pub use gateway::{PersistenceGateway, StoredMessage, User};
pub use memory::MemoryStore;
