//! Error types for the protocol layer.
//!
//! Every variant here is a framing problem. The handler treats all of
//! them as fatal for the connection: the stream is never resynchronized
//! after a bad frame.

use crate::{HEADER_LEN, MAX_BODY_LEN};

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The body is longer than a frame can carry.
    ///
    /// Raised on encode (the caller must truncate first) and on header
    /// decode when the declared length is out of range.
    #[error("body of {0} bytes exceeds the {max}-byte limit", max = MAX_BODY_LEN)]
    BodyTooLarge(usize),

    /// The kind code is not exactly four printable ASCII characters.
    #[error("invalid kind code {0:?}")]
    InvalidKind(String),

    /// The header buffer has the wrong size.
    #[error("header must be {expected} bytes, got {0}", expected = HEADER_LEN)]
    HeaderLength(usize),

    /// A numeric header field holds something other than a `u64` in
    /// decimal digits.
    #[error("header field `{field}` is not a valid number: {value:?}")]
    InvalidNumber {
        field: &'static str,
        value: String,
    },

    /// Fewer (or more) body bytes arrived than the header declared.
    #[error("body length mismatch: header declared {declared}, read {actual}")]
    BodyLengthMismatch { declared: usize, actual: usize },

    /// The frame is well formed but its kind is not part of the protocol.
    ///
    /// The raw code is kept so the error notice sent back to the client
    /// can name it.
    #[error("unrecognized message kind {0:?}")]
    UnknownKind(String),
}
