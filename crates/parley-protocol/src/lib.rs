//! Wire protocol for Parley.
//!
//! This crate defines the "language" that chat clients and the server
//! speak:
//!
//! - **Types** ([`Message`], [`MessageKind`], [`Identity`]) — the
//!   protocol units that travel on the wire.
//! - **Codec** ([`FrameCodec`], [`Header`]) — how those units are
//!   converted to and from the fixed-width text framing.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while framing.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the
//! per-connection handler. It doesn't know about sessions or chat
//! negotiation; it only knows how frames are laid out.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Handler (session context)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{FrameCodec, Header, HEADER_LEN, KIND_LEN, MAX_BODY_LEN};
pub use error::ProtocolError;
pub use types::{Identity, Message, MessageKind};
