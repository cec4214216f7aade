//! Error types for the negotiation layer.

use parley_protocol::Identity;

/// Errors that can occur while opening or resolving a chat request.
///
/// All of these are routing errors: they are reported back to the
/// client that caused them and the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// A client asked to chat with itself.
    #[error("cannot open a chat request with yourself ({0})")]
    SelfRequest(Identity),

    /// The requested identity has no live session.
    #[error("identity {0} is not online")]
    TargetOffline(Identity),

    /// The pair already has an unresolved request (in either direction).
    #[error("a chat request from {initiator} to {target} is already pending")]
    AlreadyPending { initiator: Identity, target: Identity },

    /// There is no live request from `initiator` to `responder` to resolve.
    #[error("no pending chat request from {initiator} to {responder}")]
    NoSuchRequest {
        initiator: Identity,
        responder: Identity,
    },
}
