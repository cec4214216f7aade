//! Transport abstraction layer for Parley.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! "something that hands us already-connected byte streams". The protocol
//! layer above decides where one frame ends and the next begins, so a
//! connection only knows how to read an exact number of bytes and how to
//! write a buffer.
//!
//! # Feature Flags
//!
//! - `tcp` (default) — plain TCP transport via `tokio::net`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "tcp")]
mod tcp;

pub use error::TransportError;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Identities are chosen by clients and may collide; connection ids are
/// assigned by the server and never repeat within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting new connections. Already accepted connections
    /// are unaffected.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single byte-stream connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Writes the whole buffer to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Reads up to `len` bytes, waiting until exactly `len` bytes have
    /// arrived or the peer closes its side.
    ///
    /// Returns `Ok(None)` when the stream is closed before any byte of
    /// this read arrived. A stream closed mid-read yields the short
    /// buffer, so callers can tell a truncated frame from a clean close.
    async fn recv_exact(
        &self,
        len: usize,
    ) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the write side of the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
