//! Connection handles: how one task reaches another task's socket.
//!
//! Every connection owns a single writer task that drains an unbounded
//! queue of [`Outbound`] items, one write at a time. Anything that wants
//! to talk to that connection (its own handler, a relay triggered by
//! another connection, the registry closing it) goes through a cloned
//! [`ConnectionHandle`]. Because the queue is the only path to the
//! socket, writes are serialized without any lock around the socket.

use std::sync::Arc;

use parley_protocol::Message;
use parley_transport::ConnectionId;
use tokio::sync::{mpsc, Notify};

/// An item on a connection's write queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and write this message.
    Frame(Message),
    /// Stop writing and close the connection. Items queued before this
    /// are still written.
    Close,
}

/// Receiving end of a connection's write queue, owned by its writer task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A cloneable reference to one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Outbound>,
    close_signal: Arc<Notify>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver its writer task should drain.
    pub fn new(id: ConnectionId) -> (Self, OutboundReceiver) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            outbox,
            close_signal: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Returns the id of the connection behind this handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message for the connection.
    ///
    /// Never blocks. Returns `false` if the connection's writer is gone,
    /// in which case the message is dropped; a vanished peer is not an
    /// error for the sender.
    pub fn deliver(&self, message: Message) -> bool {
        let delivered = self.outbox.send(Outbound::Frame(message)).is_ok();
        if !delivered {
            tracing::debug!(conn_id = %self.id, "dropped frame for closed connection");
        }
        delivered
    }

    /// Asks the connection to close after flushing what is already queued,
    /// and wakes its reader so it stops waiting for input.
    pub fn close(&self) {
        let _ = self.outbox.send(Outbound::Close);
        // `notify_one` stores a permit if the reader is not waiting yet,
        // so a close issued between two reads is not lost.
        self.close_signal.notify_one();
    }

    /// Completes once [`close`](Self::close) has been called on any clone
    /// of this handle.
    pub async fn closed(&self) {
        self.close_signal.notified().await;
    }

    /// Returns `true` while the writer task is still draining the queue.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }
}
