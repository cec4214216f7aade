//! Error types for the persistence layer.

use std::path::PathBuf;

/// Errors raised by a [`PersistenceGateway`](crate::PersistenceGateway).
///
/// The routing core does not inspect these; it reports a generic
/// "storage unavailable" notice and keeps serving the connection.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a backing file failed.
    #[error("storage I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backing file exists but does not hold valid records.
    #[error("corrupt record in {} at line {line}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Records could not be serialized.
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,
}
