//! # Parley
//!
//! A connection-oriented text chat server.
//!
//! Clients speak a small framed protocol over TCP: a fixed 48-byte header
//! (`[len:4][kind:4][sender:20][receiver:20]`) followed by up to 512 bytes
//! of body. Parley registers and logs in users, tracks who is online,
//! negotiates chat requests between them, relays direct messages, and
//! persists accounts and messages through a [`PersistenceGateway`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::prelude::*;
//!
//! # async fn start() -> Result<(), ParleyError> {
//! let server = ParleyServerBuilder::new()
//!     .bind("0.0.0.0:4000")
//!     .build(MemoryStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! [`PersistenceGateway`]: parley_store::PersistenceGateway

mod config;
mod error;
mod handler;
mod server;

pub use config::{NegotiationSection, ServerConfig, ServerSection, StoreKind, StoreSection};
pub use error::ParleyError;
pub use server::{HandlerConfig, ParleyServer, ParleyServerBuilder};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{
        HandlerConfig, ParleyError, ParleyServer, ParleyServerBuilder, ServerConfig, StoreKind,
    };
    pub use parley_negotiation::NegotiationConfig;
    pub use parley_protocol::{FrameCodec, Identity, Message, MessageKind};
    pub use parley_session::SessionConfig;
    pub use parley_store::{FileStore, MemoryStore, PersistenceGateway};
}
