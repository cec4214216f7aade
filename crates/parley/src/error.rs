//! Unified error type for the Parley server.

use std::path::PathBuf;
use std::time::Duration;

use parley_negotiation::NegotiationError;
use parley_protocol::ProtocolError;
use parley_session::SessionError;
use parley_store::StoreError;
use parley_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The variants line up with how a connection reacts:
///
/// | Variant | Class | Connection |
/// |---|---|---|
/// | `Transport` | I/O | closed |
/// | `Protocol` | framing error | notice, closed |
/// | `Violation` | protocol violation | notice, closed |
/// | `IdleTimeout` | protocol violation | notice, closed |
/// | `Session` | auth error | notice, stays open |
/// | `Negotiation` | routing error | notice, stays open |
/// | `Store`, `StoreTask` | persistence error | generic notice, stays open |
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A malformed frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A well-formed frame the client was not allowed to send.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// The client sent nothing within the configured idle timeout.
    #[error("connection idle for more than {}s", .0.as_secs())]
    IdleTimeout(Duration),

    /// A session could not be bound.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A chat request could not be opened or resolved.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The persistence gateway failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A store operation running on the blocking pool did not complete.
    #[error("storage task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    /// The configuration file could not be read or parsed.
    #[error("config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },
}

impl ParleyError {
    /// Returns `true` for errors that end the connection.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            ParleyError::Transport(_)
                | ParleyError::Protocol(_)
                | ParleyError::Violation(_)
                | ParleyError::IdleTimeout(_)
        )
    }

    /// The text sent to the client in an error notice.
    ///
    /// Storage failures are reported generically; their details stay in
    /// the server log.
    pub fn client_text(&self) -> String {
        match self {
            ParleyError::Store(_) | ParleyError::StoreTask(_) => {
                "Request failed: storage is unavailable, try again later".to_string()
            }
            other => other.to_string(),
        }
    }
}
