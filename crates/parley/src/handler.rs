//! Per-connection handler: framing, identification, and request routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that owns the socket's write side. The flow is:
//!   1. Spawn the writer → it drains the connection's outbound queue
//!   2. Loop: read one frame (header, then body) → dispatch by kind
//!   3. On EOF, a fatal error, a supersede, or server shutdown → release
//!      the session, let the writer flush, close
//!
//! Replies and forwarded frames never touch the socket directly: they are
//! queued on a [`ConnectionHandle`], so frames to one connection are
//! written whole and in order no matter which task produced them.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use parley_protocol::{
    FrameCodec, Identity, Message, MessageKind, HEADER_LEN, MAX_BODY_LEN,
};
use parley_session::{
    ConnectionHandle, Outbound, OutboundReceiver, Registration, SessionError,
};
use parley_store::{PersistenceGateway, StoreError, StoredMessage};
use parley_transport::{Connection, ConnectionId, TcpConnection};
use tokio::sync::watch;

use crate::server::{RoutingTables, ServerState};
use crate::ParleyError;

/// Drop guard that releases the connection's identity binding when the
/// handler exits.
///
/// The normal exit path releases explicitly through
/// [`ProtocolHandler::leave`]; this covers a handler that panics. Since
/// `Drop` is synchronous, we spawn a fire-and-forget task for the async
/// lock.
struct SessionGuard<S: PersistenceGateway> {
    identity: Option<Identity>,
    conn_id: ConnectionId,
    state: Arc<ServerState<S>>,
}

impl<S: PersistenceGateway> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(identity) = self.identity.take() else {
            return;
        };
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            release(&mut *state.tables.lock().await, identity, conn_id);
        });
    }
}

/// Unbinds `identity` if `conn_id` still owns it, and withdraws the
/// chat requests it opened. A superseded connection must leave both
/// alone: they belong to the connection that replaced it.
fn release(tables: &mut RoutingTables, identity: Identity, conn_id: ConnectionId) {
    if tables.sessions.release(identity, conn_id) {
        tables.negotiation.drop_initiator(identity);
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S: PersistenceGateway>(
    conn: TcpConnection,
    state: Arc<ServerState<S>>,
    mut stopped: watch::Receiver<bool>,
) -> Result<(), ParleyError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (handle, outbox) = ConnectionHandle::new(conn_id);
    let writer = tokio::spawn(write_loop(Arc::clone(&conn), outbox, state.codec));

    let mut handler = ProtocolHandler::new(state, handle.clone());
    let result = handler.read_loop(&conn, &mut stopped).await;
    handler.leave().await;

    // Close is queued behind any pending replies, so they go out first.
    handle.close();
    if let Err(e) = writer.await {
        tracing::warn!(%conn_id, error = %e, "writer task failed");
    }

    tracing::debug!(%conn_id, "connection finished");
    result
}

/// Drains the outbound queue onto the socket until told to close or the
/// peer goes away.
async fn write_loop(
    conn: Arc<TcpConnection>,
    mut outbox: OutboundReceiver,
    codec: FrameCodec,
) {
    let conn_id = conn.id();

    while let Some(item) = outbox.recv().await {
        let message = match item {
            Outbound::Frame(message) => message,
            Outbound::Close => break,
        };
        let bytes = match codec.encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    %conn_id,
                    kind = %message.kind,
                    error = %e,
                    "dropping frame that cannot be encoded"
                );
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(%conn_id, error = %e, "write failed");
            break;
        }
    }

    if let Err(e) = conn.close().await {
        tracing::debug!(%conn_id, error = %e, "close failed");
    }
}

/// Reads one frame: the fixed header, then exactly the declared body.
///
/// Returns `Ok(None)` when the peer closed between frames.
async fn read_frame(
    conn: &TcpConnection,
    codec: &FrameCodec,
) -> Result<Option<Message>, ParleyError> {
    let Some(head) = conn.recv_exact(HEADER_LEN).await? else {
        return Ok(None);
    };
    let header = codec.decode_header(&head)?;
    let body = conn.recv_exact(header.body_length).await?.unwrap_or_default();
    Ok(Some(codec.decode_body(&header, body)?))
}

/// Completes once the server has been told to stop, or is gone.
async fn shutdown_signal(stopped: &mut watch::Receiver<bool>) {
    let _ = stopped.wait_for(|stop| *stop).await;
}

/// The per-connection state machine.
///
/// `session.identity` is the connection state: `None` while Connected,
/// `Some` once Identified.
struct ProtocolHandler<S: PersistenceGateway> {
    state: Arc<ServerState<S>>,
    handle: ConnectionHandle,
    session: SessionGuard<S>,
}

impl<S: PersistenceGateway> ProtocolHandler<S> {
    fn new(state: Arc<ServerState<S>>, handle: ConnectionHandle) -> Self {
        let session = SessionGuard {
            identity: None,
            conn_id: handle.id(),
            state: Arc::clone(&state),
        };
        Self {
            state,
            handle,
            session,
        }
    }

    fn conn_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Processes frames in arrival order until the connection ends.
    async fn read_loop(
        &mut self,
        conn: &TcpConnection,
        stopped: &mut watch::Receiver<bool>,
    ) -> Result<(), ParleyError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_signal(stopped) => {
                    tracing::info!(conn_id = %self.conn_id(), "closing for server shutdown");
                    self.notify(MessageKind::Error, self.peer(), "Server is shutting down");
                    return Ok(());
                }
                _ = self.handle.closed() => {
                    tracing::info!(conn_id = %self.conn_id(), "connection closed by server");
                    return Ok(());
                }
                next = self.next_frame(conn) => next,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::info!(conn_id = %self.conn_id(), "connection closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    self.refuse(&e);
                    return Err(e);
                }
            };

            tracing::debug!(
                conn_id = %self.conn_id(),
                kind = %message.kind,
                sender = %message.sender,
                receiver = %message.receiver,
                len = message.body.len(),
                "frame received"
            );

            match self.dispatch(message).await {
                Ok(()) => {}
                Err(e) if e.closes_connection() => {
                    self.refuse(&e);
                    return Err(e);
                }
                Err(e) => {
                    if matches!(e, ParleyError::Store(_) | ParleyError::StoreTask(_)) {
                        tracing::warn!(conn_id = %self.conn_id(), error = %e, "storage failure");
                    } else {
                        tracing::debug!(conn_id = %self.conn_id(), error = %e, "request refused");
                    }
                    self.notify(MessageKind::Error, self.peer(), e.client_text());
                }
            }
        }
    }

    async fn next_frame(&self, conn: &TcpConnection) -> Result<Option<Message>, ParleyError> {
        match self.state.handler.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read_frame(conn, &self.state.codec))
                .await
                .map_err(|_| ParleyError::IdleTimeout(limit))?,
            None => read_frame(conn, &self.state.codec).await,
        }
    }

    async fn dispatch(&mut self, message: Message) -> Result<(), ParleyError> {
        match message.kind {
            MessageKind::Register => self.on_register(message).await,
            MessageKind::Login => self.on_login(message).await,
            MessageKind::ShowClients => self.on_show_clients(message).await,
            MessageKind::ChatConnect => self.on_chat_connect(message).await,
            MessageKind::ChatAccept => self.on_chat_reply(message, true).await,
            MessageKind::ChatDeny => self.on_chat_reply(message, false).await,
            MessageKind::SendMessage => self.on_send_message(message).await,
            MessageKind::History => self.on_history(message).await,
            MessageKind::Logout => self.on_logout(message).await,
            MessageKind::ReceiveMessage | MessageKind::Error => Err(ParleyError::Violation(
                format!("{} may only be sent by the server", message.kind),
            )),
        }
    }

    // =====================================================================
    // Identification
    // =====================================================================

    async fn on_register(&mut self, message: Message) -> Result<(), ParleyError> {
        self.require_anonymous(&message)?;
        let identity = message.sender;

        if identity.is_server() {
            let reason = SessionError::ReservedIdentity;
            self.notify(MessageKind::Register, identity, format!("Registration failed: {reason}"));
            return Ok(());
        }
        let body = message.body_text();
        let Some((name, password)) = parse_credentials(&body) else {
            self.notify(
                MessageKind::Register,
                identity,
                "Registration failed: expected name:password",
            );
            return Ok(());
        };

        let (owned_name, owned_password) = (name.to_string(), password.to_string());
        let created = self
            .store(move |store| store.create_user(identity, &owned_name, &owned_password))
            .await?;
        if !created {
            self.notify(
                MessageKind::Register,
                identity,
                format!("Registration failed: identity {identity} is already registered"),
            );
            return Ok(());
        }
        tracing::info!(%identity, name, "account created");

        let text = match self.bind(identity).await {
            Ok(()) => format!("Registration successful! Your ID: {identity}"),
            Err(e) => format!("Registration failed: account created but not logged in: {e}"),
        };
        self.notify(MessageKind::Register, identity, text);
        Ok(())
    }

    async fn on_login(&mut self, message: Message) -> Result<(), ParleyError> {
        self.require_anonymous(&message)?;
        let identity = message.sender;
        let password = message.body_text().into_owned();

        let text = match self.store(move |store| store.verify(identity, &password)).await? {
            None => {
                tracing::info!(conn_id = %self.conn_id(), %identity, "login refused");
                "Login failed: invalid identity or password".to_string()
            }
            Some(user) => match self.bind(identity).await {
                Ok(()) => format!("Welcome back, {}!", user.name),
                Err(e) => format!("Login failed: {e}"),
            },
        };
        self.notify(MessageKind::Login, identity, text);
        Ok(())
    }

    /// Binds `identity` to this connection, superseding any other.
    async fn bind(&mut self, identity: Identity) -> Result<(), SessionError> {
        let registration = self
            .state
            .tables
            .lock()
            .await
            .sessions
            .register(identity, self.handle.clone());

        match registration {
            Registration::Accepted | Registration::Superseded(_) => {
                self.session.identity = Some(identity);
                Ok(())
            }
            Registration::Rejected(e) => Err(e),
        }
    }

    async fn on_logout(&mut self, message: Message) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        self.leave().await;
        tracing::info!(conn_id = %self.conn_id(), identity = %me, "logged out");
        self.notify(MessageKind::Logout, me, format!("Goodbye, {me}"));
        Ok(())
    }

    /// Drops the identity binding, if any. The connection stays usable.
    async fn leave(&mut self) {
        if let Some(identity) = self.session.identity.take() {
            release(&mut *self.state.tables.lock().await, identity, self.conn_id());
        }
    }

    // =====================================================================
    // Directory and negotiation
    // =====================================================================

    async fn on_show_clients(&mut self, message: Message) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        let names = self.store(|store| store.list_users()).await?;
        let online = self.state.tables.lock().await.sessions.online();

        self.notify(MessageKind::ShowClients, me, client_list(&online, &names));
        Ok(())
    }

    async fn on_chat_connect(&mut self, message: Message) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        let target = message.receiver;
        {
            let mut tables = self.state.tables.lock().await;
            let RoutingTables {
                sessions,
                negotiation,
            } = &mut *tables;
            negotiation.open_request(sessions, me, target, Instant::now())?;
        }

        self.notify(MessageKind::ChatConnect, me, format!("Chat request sent to {target}"));
        Ok(())
    }

    async fn on_chat_reply(&mut self, message: Message, accepted: bool) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        let initiator = message.receiver;
        let resolution = {
            let mut tables = self.state.tables.lock().await;
            let RoutingTables {
                sessions,
                negotiation,
            } = &mut *tables;
            negotiation.resolve(sessions, me, initiator, accepted, Instant::now())?
        };

        let verb = if resolution.accepted { "accepted" } else { "denied" };
        let mut text = format!("You {verb} the chat request from {initiator}");
        if !resolution.notified {
            let _ = write!(text, " ({initiator} is offline)");
        }
        self.notify(message.kind, me, text);
        Ok(())
    }

    // =====================================================================
    // Messaging
    // =====================================================================

    async fn on_send_message(&mut self, message: Message) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        let receiver = message.receiver;
        if receiver.is_server() {
            self.notify(MessageKind::Error, me, "Message not sent: no receiver given");
            return Ok(());
        }
        let content = message.body_text().into_owned();

        let delivered = match self.state.tables.lock().await.sessions.lookup(receiver) {
            Ok(conn) => conn.deliver(Message::new(
                MessageKind::ReceiveMessage,
                me,
                receiver,
                message.body,
            )),
            Err(_) => false,
        };

        let stored = self
            .store(move |store| store.append_message(me, receiver, &content))
            .await;
        tracing::debug!(
            conn_id = %self.conn_id(),
            sender = %me,
            %receiver,
            delivered,
            stored = stored.is_ok(),
            "message relayed"
        );

        match (delivered, stored) {
            (true, Ok(())) => {
                self.notify(MessageKind::SendMessage, me, format!("Message delivered to {receiver}"));
            }
            (false, Ok(())) => {
                self.notify(
                    MessageKind::SendMessage,
                    me,
                    format!("Message saved; {receiver} is offline"),
                );
            }
            (delivered, Err(e)) => {
                tracing::warn!(conn_id = %self.conn_id(), error = %e, "message not stored");
                let outcome = if delivered { "delivered" } else { "not delivered" };
                self.notify(
                    MessageKind::Error,
                    me,
                    format!("Message {outcome} to {receiver} but could not be saved"),
                );
            }
        }
        Ok(())
    }

    async fn on_history(&mut self, message: Message) -> Result<(), ParleyError> {
        let me = self.caller(&message)?;
        let peer = message.receiver;
        let history = self.store(move |store| store.history(me, peer)).await?;

        self.notify(MessageKind::History, me, transcript(peer, &history));
        Ok(())
    }

    // =====================================================================
    // Helpers
    // =====================================================================

    /// Runs a store operation on the blocking thread pool. The file store
    /// writes to disk under a lock, which must not stall this worker.
    async fn store<T, F>(&self, op: F) -> Result<T, ParleyError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let result = tokio::task::spawn_blocking(move || op(&state.store)).await?;
        Ok(result?)
    }

    /// Returns the session identity for a request that needs one.
    ///
    /// The header `sender_id` is not trusted: it is replaced by the bound
    /// identity, or refused outright when `reject_spoofed_sender` is set.
    fn caller(&self, message: &Message) -> Result<Identity, ParleyError> {
        let Some(me) = self.session.identity else {
            return Err(ParleyError::Violation(format!(
                "{} requires a logged-in session",
                message.kind
            )));
        };
        if self.state.handler.reject_spoofed_sender
            && !message.sender.is_server()
            && message.sender != me
        {
            return Err(ParleyError::Violation(format!(
                "sender {} does not match session identity {me}",
                message.sender
            )));
        }
        Ok(me)
    }

    fn require_anonymous(&self, message: &Message) -> Result<(), ParleyError> {
        match self.session.identity {
            Some(me) => Err(ParleyError::Violation(format!(
                "{} while already logged in as {me}",
                message.kind
            ))),
            None => Ok(()),
        }
    }

    /// The identity replies go to when nothing more specific is known.
    fn peer(&self) -> Identity {
        self.session.identity.unwrap_or(Identity::SERVER)
    }

    fn notify(&self, kind: MessageKind, receiver: Identity, text: impl Into<String>) {
        self.handle.deliver(Message::notice(kind, receiver, text));
    }

    /// Tells the client why its connection is about to close.
    fn refuse(&self, error: &ParleyError) {
        match error {
            ParleyError::Transport(e) => {
                tracing::debug!(conn_id = %self.conn_id(), error = %e, "read failed");
            }
            other => {
                tracing::info!(conn_id = %self.conn_id(), error = %other, "closing connection");
                self.notify(MessageKind::Error, self.peer(), other.client_text());
            }
        }
    }
}

/// Splits a REG body into `(name, password)`. The name is everything
/// before the first `:` and must be non-empty, printable text.
fn parse_credentials(body: &str) -> Option<(&str, &str)> {
    let (name, password) = body.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_control) {
        return None;
    }
    Some((name, password))
}

/// Formats the S_C reply. Lines past the body limit are left out.
fn client_list(online: &[Identity], names: &BTreeMap<Identity, String>) -> String {
    let mut text = String::from("Online clients:\n");
    for identity in online {
        let name = names.get(identity).map_or("?", String::as_str);
        let line = format!("ID: {identity} Name: {name}\n");
        if text.len() + line.len() > MAX_BODY_LEN {
            break;
        }
        text.push_str(&line);
    }
    text
}

/// Formats the H_M reply, keeping the most recent lines that fit.
fn transcript(peer: Identity, history: &[StoredMessage]) -> String {
    if history.is_empty() {
        return format!("No messages with {peer}");
    }
    let mut text = format!("History with {peer}:\n");
    let mut budget = MAX_BODY_LEN.saturating_sub(text.len());

    let mut lines = Vec::new();
    for message in history.iter().rev() {
        let line = format!("{}: {}\n", message.sender, message.content);
        if line.len() > budget {
            break;
        }
        budget -= line.len();
        lines.push(line);
    }
    for line in lines.iter().rev() {
        text.push_str(line);
    }
    text
}
