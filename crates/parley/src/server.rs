//! `ParleyServer` builder and server loop.
//!
//! This is the entry point for running a Parley chat server. It ties
//! together all the layers: transport → protocol → session → negotiation,
//! with the persistence gateway on the side.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_negotiation::{ChatNegotiation, NegotiationConfig};
use parley_protocol::{FrameCodec, Message, MessageKind};
use parley_session::{SessionConfig, SessionRegistry};
use parley_store::PersistenceGateway;
use parley_transport::{TcpTransport, Transport, TransportError};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::handler::handle_connection;
use crate::ParleyError;

/// Lower bound for the sweep interval; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Per-connection behavior shared by every handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Close a connection that sends nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Reject frames whose `sender_id` differs from the session identity.
    /// When `false` the server silently uses the session identity.
    pub reject_spoofed_sender: bool,
}

/// The two routing tables. They share one lock so that a negotiation
/// decision always sees the same "who is online" as the delivery it
/// triggers.
pub(crate) struct RoutingTables {
    pub(crate) sessions: SessionRegistry,
    pub(crate) negotiation: ChatNegotiation,
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S: PersistenceGateway> {
    pub(crate) tables: Mutex<RoutingTables>,
    pub(crate) store: S,
    pub(crate) codec: FrameCodec,
    pub(crate) handler: HandlerConfig,
}

/// Builder for configuring and starting a Parley server.
///
/// # Example
///
/// ```rust,no_run
/// use parley::prelude::*;
///
/// # async fn start() -> Result<(), ParleyError> {
/// let server = ParleyServerBuilder::new()
///     .bind("0.0.0.0:4000")
///     .build(MemoryStore::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ParleyServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    negotiation_config: NegotiationConfig,
    handler_config: HandlerConfig,
}

impl ParleyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            session_config: SessionConfig::default(),
            negotiation_config: NegotiationConfig::default(),
            handler_config: HandlerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session registry configuration (capacity).
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the chat-request expiry configuration. A zero sweep interval
    /// is raised to a small minimum.
    pub fn negotiation_config(mut self, config: NegotiationConfig) -> Self {
        self.negotiation_config = config;
        self
    }

    /// Sets the per-connection behavior (idle timeout, sender checks).
    pub fn handler_config(mut self, config: HandlerConfig) -> Self {
        self.handler_config = config;
        self
    }

    /// Binds the listener and assembles the server around `store`.
    pub async fn build<S: PersistenceGateway>(
        self,
        store: S,
    ) -> Result<ParleyServer<S>, ParleyError> {
        let transport = TcpTransport::bind(&self.bind_addr).await?;

        let sweep_interval = self
            .negotiation_config
            .expires()
            .then_some(self.negotiation_config.sweep_interval);

        let state = Arc::new(ServerState {
            tables: Mutex::new(RoutingTables {
                sessions: SessionRegistry::new(self.session_config),
                negotiation: ChatNegotiation::new(self.negotiation_config),
            }),
            store,
            codec: FrameCodec,
            handler: self.handler_config,
        });

        Ok(ParleyServer {
            transport,
            state,
            sweep_interval,
        })
    }
}

impl Default for ParleyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Parley server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ParleyServer<S: PersistenceGateway> {
    transport: TcpTransport,
    state: Arc<ServerState<S>>,
    sweep_interval: Option<Duration>,
}

impl<S: PersistenceGateway> ParleyServer<S> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ParleyError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// Each accepted connection gets its own handler task. On shutdown
    /// the listener stops accepting, every connection (identified or not)
    /// is told to close, and this returns once all handlers have finished.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ParleyError> {
        let sweeper = self
            .sweep_interval
            .map(|every| spawn_sweeper(Arc::clone(&self.state), every));
        let (stop, stopped) = watch::channel(false);
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!(addr = ?self.local_addr().ok(), "Parley server running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        tracing::warn!(error = %e, "connection task failed");
                    }
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        let stopped = stopped.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(conn, state, stopped).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(TransportError::Shutdown) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        self.transport.shutdown().await?;
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        let _ = stop.send(true);
        let open = handlers.len();
        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                tracing::warn!(error = %e, "connection task failed");
            }
        }

        tracing::info!(connections = open, "server stopped");
        Ok(())
    }
}

/// Periodically drops chat requests nobody answered in time, telling each
/// initiator that is still online.
fn spawn_sweeper<S: PersistenceGateway>(
    state: Arc<ServerState<S>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let mut tables = state.tables.lock().await;
            let expired = tables.negotiation.expire_stale(Instant::now());
            for request in expired {
                if let Ok(handle) = tables.sessions.lookup(request.initiator) {
                    handle.deliver(Message::notice(
                        MessageKind::Error,
                        request.initiator,
                        format!("Chat request to {} expired", request.target),
                    ));
                }
            }
        }
    })
}
