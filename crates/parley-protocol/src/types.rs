//! Core protocol types for Parley's wire format.
//!
//! Everything in this module is a value that either travels on the wire
//! or names something that does. The codec turns these into bytes; the
//! handler decides what to do with them.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A client identity: a 64-bit value the client picks when it connects.
///
/// Identities are not secret and not unique by construction. Two clients
/// can pick the same one; the session registry decides who keeps it.
///
/// `Identity(0)` is reserved. In a header it means "unaddressed" (for a
/// receiver) or "the server" (for a sender), and it can never be
/// registered.
///
/// `#[serde(transparent)]` stores it as a bare number, which keeps the
/// persisted user and message records readable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Identity(pub u64);

impl Identity {
    /// The reserved server/unaddressed identity.
    pub const SERVER: Identity = Identity(0);

    /// Returns `true` for the reserved identity `0`.
    pub fn is_server(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Identity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The closed set of message kinds.
///
/// On the wire each kind is a 4-character code (`#REG`, `#S_M`, ...).
/// The codec decodes the code once; from then on the handler matches on
/// this enum, so adding a variant makes every non-exhaustive `match`
/// a compile error instead of a silently ignored string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Create an account and bind the session. Body: `name:password`.
    Register,
    /// Log into an existing account. Body: the password.
    Login,
    /// List online clients.
    ShowClients,
    /// Ask another identity to chat.
    ChatConnect,
    /// Accept a pending chat request.
    ChatAccept,
    /// Deny a pending chat request.
    ChatDeny,
    /// Send a text message to another identity.
    SendMessage,
    /// A message relayed from another identity. Server → client only.
    ReceiveMessage,
    /// An error notice. Server → client only.
    Error,
    /// Fetch the stored conversation with another identity.
    History,
    /// End the session but keep the connection open.
    Logout,
}

impl MessageKind {
    /// Every kind, in wire-code order. Handy for tests and tooling.
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Register,
        MessageKind::Login,
        MessageKind::ShowClients,
        MessageKind::ChatConnect,
        MessageKind::ChatAccept,
        MessageKind::ChatDeny,
        MessageKind::SendMessage,
        MessageKind::ReceiveMessage,
        MessageKind::Error,
        MessageKind::History,
        MessageKind::Logout,
    ];

    /// Returns the 4-character wire code for this kind.
    pub const fn code(self) -> &'static str {
        match self {
            MessageKind::Register => "#REG",
            MessageKind::Login => "#LOG",
            MessageKind::ShowClients => "#S_C",
            MessageKind::ChatConnect => "#C_C",
            MessageKind::ChatAccept => "#C_A",
            MessageKind::ChatDeny => "#C_D",
            MessageKind::SendMessage => "#S_M",
            MessageKind::ReceiveMessage => "#R_M",
            MessageKind::Error => "#E_M",
            MessageKind::History => "#H_M",
            MessageKind::Logout => "#L_O",
        }
    }

    /// Parses a wire code. Returns `None` for anything outside the
    /// protocol.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Returns `true` for kinds only the server may send.
    pub fn is_server_only(self) -> bool {
        matches!(self, MessageKind::ReceiveMessage | MessageKind::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single protocol unit: one decoded frame.
///
/// ```text
/// ┌──────────┬──────┬──────────────────────┬──────────────────────┐
/// │ body_len │ kind │ sender_id            │ receiver_id          │  48-byte header
/// ├──────────┴──────┴──────────────────────┴──────────────────────┤
/// │ body (0..=512 raw bytes)                                      │
/// └───────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: Identity,
    pub receiver: Identity,
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message from its parts.
    pub fn new(
        kind: MessageKind,
        sender: Identity,
        receiver: Identity,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            sender,
            receiver,
            body: body.into(),
        }
    }

    /// Creates a server-originated text notice addressed to `receiver`.
    pub fn notice(
        kind: MessageKind,
        receiver: Identity,
        text: impl Into<String>,
    ) -> Self {
        Self::new(kind, Identity::SERVER, receiver, text.into().into_bytes())
    }

    /// Returns the body as text, replacing invalid UTF-8 sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_serializes_as_plain_number() {
        let json = serde_json::to_string(&Identity(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_identity_deserializes_from_plain_number() {
        let id: Identity = serde_json::from_str("7").unwrap();
        assert_eq!(id, Identity(7));
    }

    #[test]
    fn test_identity_zero_is_server() {
        assert!(Identity::SERVER.is_server());
        assert!(Identity(0).is_server());
        assert!(!Identity(1).is_server());
    }

    #[test]
    fn test_message_kind_codes_are_four_chars_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in MessageKind::ALL {
            assert_eq!(kind.code().len(), 4, "{kind:?}");
            assert!(seen.insert(kind.code()), "duplicate code {}", kind.code());
        }
    }

    #[test]
    fn test_message_kind_from_code_matches_code() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_code(kind.code()), Some(kind));
        }
    }

    #[test]
    fn test_message_kind_from_code_unknown_returns_none() {
        assert_eq!(MessageKind::from_code("#XYZ"), None);
        assert_eq!(MessageKind::from_code("REG"), None);
        assert_eq!(MessageKind::from_code(""), None);
    }

    #[test]
    fn test_message_kind_server_only() {
        assert!(MessageKind::ReceiveMessage.is_server_only());
        assert!(MessageKind::Error.is_server_only());
        assert!(!MessageKind::SendMessage.is_server_only());
    }

    #[test]
    fn test_message_notice_is_sent_by_server() {
        let msg = Message::notice(MessageKind::Register, Identity(5), "ok");
        assert_eq!(msg.sender, Identity::SERVER);
        assert_eq!(msg.receiver, Identity(5));
        assert_eq!(msg.body_text(), "ok");
    }

    #[test]
    fn test_message_body_text_replaces_invalid_utf8() {
        let msg = Message::new(
            MessageKind::SendMessage,
            Identity(1),
            Identity(2),
            vec![b'h', 0xFF, b'i'],
        );
        assert_eq!(msg.body_text(), "h\u{FFFD}i");
    }
}
