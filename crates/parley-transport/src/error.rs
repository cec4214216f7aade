/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting an incoming stream failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Writing to the peer failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading from the peer failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The transport stopped accepting connections.
    #[error("transport shut down")]
    Shutdown,
}
