//! TCP transport implementation using `tokio::net`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
    shut_down: AtomicBool,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    ///
    /// Pass port `0` to let the OS pick a free port, then read it back
    /// with [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }

        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream);
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shut_down.store(true, Ordering::Release);
        Ok(())
    }
}

/// A single TCP connection.
///
/// The stream is split so that the reader task and the writer task
/// never contend for the same lock.
pub struct TcpConnection {
    id: ConnectionId,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpConnection {
    /// Wraps an already-connected stream, assigning it a fresh id.
    pub fn from_stream(stream: TcpStream) -> Self {
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%id, error = %e, "could not disable Nagle's algorithm");
        }
        let (reader, writer) = stream.into_split();
        Self {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn recv_exact(
        &self,
        len: usize,
    ) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut reader = self.reader.lock().await;
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 && len > 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
