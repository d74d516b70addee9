//! Realtime hub connection: lifecycle, automatic reconnect, invocations.
//!
//! DESIGN
//! ======
//! `ConnectionManager` is owned by the session and mutated through
//! `&mut self`. The socket itself lives in a spawned driver task; the two
//! talk over channels:
//! - commands (invocations) flow manager -> driver, each with a oneshot reply
//! - events (state changes, pushes, hub errors) flow driver -> manager
//!
//! Dropping the command sender is the shutdown signal: the driver closes the
//! link, fails in-flight invocations and exits. That makes `disconnect`
//! synchronous and idempotent.
//!
//! LIFECYCLE
//! =========
//! ```text
//! Disconnected -> Connecting -> Connected <-> Reconnecting
//!       ^             |              |             |
//!       +-------------+--------------+-------------+
//! ```
//! - The first connect attempt is not retried; failure lands in `Disconnected`.
//! - A lost link (socket error, server timeout, reconnectable close) walks
//!   the retry schedule. Exhausting it lands in `Disconnected`.
//! - Invocations are only accepted while `Connected`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use frames::{HubMessage, RecordBuffer};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HubOptions;
use crate::error::ChatError;
use crate::model::{ConnectionState, PushPayload};
use crate::transport::{Link, Transport};

/// Client-to-server method that delivers a chat message.
pub const SEND_MESSAGE: &str = "SendMessage";
/// Server-to-client push carrying one message.
pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
/// Server-to-client push carrying an error string.
pub const RECEIVE_EXCEPTION: &str = "ReceiveException";

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Something the session should react to.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    MessageReceived(PushPayload),
    /// A `ReceiveMessage` push whose payload could not be decoded.
    MalformedPush(String),
    /// The hub reported an error through `ReceiveException`.
    ServerException(String),
    TransportError(String),
}

type Reply = oneshot::Sender<Result<Value, ChatError>>;

enum Command {
    Invoke { target: String, arguments: Vec<Value>, reply: Reply },
}

struct ActiveLink {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

// =============================================================================
// MANAGER
// =============================================================================

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    options: HubOptions,
    state: watch::Sender<ConnectionState>,
    active: Option<ActiveLink>,
    /// Events read while `connect` waited for the first outcome.
    backlog: VecDeque<ConnectionEvent>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: HubOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { transport, options, state, active: None, backlog: VecDeque::new() }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the realtime channel, replacing any existing one.
    ///
    /// A missing or empty credential or endpoint makes this a logged no-op.
    /// Otherwise resolves once the first attempt settles, returning
    /// `Connected` or `Disconnected`. Connection failures never surface as
    /// errors; they are state.
    pub async fn connect(&mut self, credential: Option<&str>, endpoint: Option<&str>) -> ConnectionState {
        let credential = credential.filter(|token| !token.is_empty());
        let endpoint = endpoint.filter(|url| !url.is_empty());
        let (Some(token), Some(url)) = (credential, endpoint) else {
            tracing::warn!(
                has_credential = credential.is_some(),
                has_endpoint = endpoint.is_some(),
                "realtime connect skipped"
            );
            return self.state();
        };

        self.disconnect();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            transport: Arc::clone(&self.transport),
            url: url.to_owned(),
            token: token.to_owned(),
            options: self.options.clone(),
            commands: commands_rx,
            events: events_tx,
            pending: HashMap::new(),
            next_invocation: 0,
        };
        tokio::spawn(driver.run());
        self.active = Some(ActiveLink { commands: commands_tx, events: events_rx });

        loop {
            let Some(active) = self.active.as_mut() else {
                break;
            };
            let received = active.events.recv().await;
            let Some(event) = received else {
                self.active = None;
                self.set_state(ConnectionState::Disconnected);
                break;
            };
            let settled = matches!(
                event,
                ConnectionEvent::StateChanged(ConnectionState::Connected | ConnectionState::Disconnected)
            );
            if let ConnectionEvent::StateChanged(state) = &event {
                self.set_state(*state);
            }
            self.backlog.push_back(event);
            if settled {
                break;
            }
        }
        self.state()
    }

    /// Stop the realtime channel. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.active.take().is_some() {
            tracing::info!("realtime connection stopped");
        }
        self.backlog.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Next event from the driver. Pending forever while no channel is open,
    /// so it can sit in a `select!` next to other sources.
    ///
    /// State changes are applied before the event is returned.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        if let Some(event) = self.backlog.pop_front() {
            return event;
        }
        loop {
            let Some(active) = self.active.as_mut() else {
                return std::future::pending().await;
            };
            let received = active.events.recv().await;
            match received {
                Some(event) => {
                    if let ConnectionEvent::StateChanged(state) = &event {
                        self.set_state(*state);
                    }
                    return event;
                }
                None => {
                    self.active = None;
                    if self.state() != ConnectionState::Disconnected {
                        self.set_state(ConnectionState::Disconnected);
                        return ConnectionEvent::StateChanged(ConnectionState::Disconnected);
                    }
                }
            }
        }
    }

    /// Invoke a hub method and wait for its completion.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotConnected`] unless `Connected`; [`ChatError::Hub`]
    /// when the hub completes with an error; [`ChatError::ConnectionLost`]
    /// when the link drops first; [`ChatError::Timeout`] past the
    /// invocation deadline.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, ChatError> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        let active = self.active.as_ref().ok_or(ChatError::NotConnected)?;
        let (reply, response) = oneshot::channel();
        active
            .commands
            .send(Command::Invoke { target: target.to_owned(), arguments, reply })
            .map_err(|_| ChatError::ConnectionLost)?;

        match tokio::time::timeout(self.options.invoke_timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChatError::ConnectionLost),
            Err(_) => Err(ChatError::Timeout("hub invocation")),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum SessionEnd {
    /// The manager hung up.
    Shutdown,
    /// The hub closed the connection and does not want a reconnect.
    Closed(Option<String>),
    /// The link broke; worth reconnecting.
    Lost(String),
}

enum Reconnect {
    Linked(Established),
    Exhausted,
    Shutdown,
}

struct Established {
    link: Box<dyn Link>,
    buffer: RecordBuffer,
    /// Records that arrived in the same chunk as the handshake response.
    early: Vec<String>,
}

struct Driver {
    transport: Arc<dyn Transport>,
    url: String,
    token: String,
    options: HubOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    pending: HashMap<String, Reply>,
    next_invocation: u64,
}

impl Driver {
    async fn run(mut self) {
        self.emit_state(ConnectionState::Connecting);
        let mut session = match self.open_link().await {
            None => return,
            Some(Ok(established)) => established,
            Some(Err(e)) => {
                tracing::warn!(error = %e, url = %self.url, "hub connect failed");
                self.emit(ConnectionEvent::TransportError(e.to_string()));
                self.emit_state(ConnectionState::Disconnected);
                return;
            }
        };
        self.emit_state(ConnectionState::Connected);

        loop {
            let end = self.run_session(&mut session).await;
            self.fail_pending();
            match end {
                SessionEnd::Shutdown => {
                    close_link(session.link.as_mut()).await;
                    return;
                }
                SessionEnd::Closed(error) => {
                    tracing::info!(error = ?error, "hub closed the connection");
                    close_link(session.link.as_mut()).await;
                    if let Some(error) = error {
                        self.emit(ConnectionEvent::TransportError(error));
                    }
                    self.emit_state(ConnectionState::Disconnected);
                    return;
                }
                SessionEnd::Lost(reason) => {
                    tracing::warn!(%reason, "hub connection lost");
                    self.emit(ConnectionEvent::TransportError(reason));
                    self.emit_state(ConnectionState::Reconnecting);
                    match self.reconnect().await {
                        Reconnect::Linked(next) => {
                            session = next;
                            self.emit_state(ConnectionState::Connected);
                        }
                        Reconnect::Exhausted => {
                            tracing::warn!("hub reconnect attempts exhausted");
                            self.emit_state(ConnectionState::Disconnected);
                            return;
                        }
                        Reconnect::Shutdown => return,
                    }
                }
            }
        }
    }

    /// One connect attempt under the connect timeout. `None` on shutdown.
    async fn open_link(&mut self) -> Option<Result<Established, ChatError>> {
        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let token = self.token.clone();
        let limit = self.options.connect_timeout;
        let attempt = async move {
            match tokio::time::timeout(limit, establish(transport.as_ref(), &url, &token)).await {
                Ok(result) => result,
                Err(_) => Err(ChatError::Timeout("hub connect")),
            }
        };
        self.reject_while(attempt).await
    }

    async fn reconnect(&mut self) -> Reconnect {
        let mut attempt = 0;
        while let Some(delay) = self.options.retry.delay_for(attempt) {
            attempt += 1;
            if self.reject_while(tokio::time::sleep(delay)).await.is_none() {
                return Reconnect::Shutdown;
            }
            tracing::info!(attempt, "reconnecting to hub");
            match self.open_link().await {
                None => return Reconnect::Shutdown,
                Some(Ok(established)) => return Reconnect::Linked(established),
                Some(Err(e)) => tracing::warn!(attempt, error = %e, "hub reconnect attempt failed"),
            }
        }
        Reconnect::Exhausted
    }

    /// Drive `fut` while answering invocations with `NotConnected`.
    /// `None` when the manager hangs up first.
    async fn reject_while<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                command = self.commands.recv() => match command {
                    Some(Command::Invoke { target, reply, .. }) => {
                        tracing::debug!(%target, "invocation rejected while not connected");
                        if reply.send(Err(ChatError::NotConnected)).is_err() {
                            tracing::debug!("invocation caller gone");
                        }
                    }
                    None => return None,
                },
            }
        }
    }

    async fn run_session(&mut self, session: &mut Established) -> SessionEnd {
        let mut last_seen = Instant::now();
        for record in std::mem::take(&mut session.early) {
            if let Some(end) = self.handle_record(&record) {
                return end;
            }
        }

        let period = self.options.keepalive.max(Duration::from_millis(1));
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.send_command(session.link.as_mut(), command).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                incoming = session.link.recv_text() => match incoming {
                    None => return SessionEnd::Lost("hub closed the link".to_owned()),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(chunk)) => {
                        last_seen = Instant::now();
                        for record in session.buffer.push(&chunk) {
                            if let Some(end) = self.handle_record(&record) {
                                return end;
                            }
                        }
                    }
                },
                _ = keepalive.tick() => {
                    if last_seen.elapsed() >= self.options.server_timeout {
                        return SessionEnd::Lost("no traffic from hub within server timeout".to_owned());
                    }
                    let ping = frames::encode_message(&HubMessage::Ping);
                    if let Err(e) = session.link.send_text(ping).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
            }
        }
    }

    async fn send_command(&mut self, link: &mut dyn Link, command: Command) -> Result<(), ChatError> {
        let Command::Invoke { target, arguments, reply } = command;
        self.pending.retain(|_, waiting| !waiting.is_closed());
        self.next_invocation += 1;
        let invocation_id = self.next_invocation.to_string();
        let record = frames::encode_message(&HubMessage::invocation(invocation_id.clone(), target.clone(), arguments));

        if let Err(e) = link.send_text(record).await {
            if reply.send(Err(ChatError::ConnectionLost)).is_err() {
                tracing::debug!("invocation caller gone");
            }
            return Err(e);
        }
        tracing::debug!(%target, %invocation_id, "hub invocation sent");
        self.pending.insert(invocation_id, reply);
        Ok(())
    }

    fn handle_record(&mut self, record: &str) -> Option<SessionEnd> {
        let message = match frames::decode_message(record) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable hub record dropped");
                return None;
            }
        };
        match message {
            HubMessage::Invocation { target, arguments, .. } => {
                self.dispatch_invocation(&target, arguments);
                None
            }
            HubMessage::Completion { invocation_id, result, error } => {
                let Some(reply) = self.pending.remove(&invocation_id) else {
                    tracing::debug!(%invocation_id, "completion for unknown invocation");
                    return None;
                };
                let outcome = match error {
                    Some(error) => Err(ChatError::Hub(error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                if reply.send(outcome).is_err() {
                    tracing::debug!(%invocation_id, "invocation caller gone");
                }
                None
            }
            HubMessage::Ping => None,
            HubMessage::Close { error, allow_reconnect: true } => {
                Some(SessionEnd::Lost(error.unwrap_or_else(|| "hub requested reconnect".to_owned())))
            }
            HubMessage::Close { error, allow_reconnect: false } => Some(SessionEnd::Closed(error)),
            other => {
                tracing::debug!(kind = ?other.kind(), "unhandled hub message");
                None
            }
        }
    }

    fn dispatch_invocation(&self, target: &str, arguments: Vec<Value>) {
        if target.eq_ignore_ascii_case(RECEIVE_MESSAGE) {
            let Some(payload) = arguments.into_iter().next() else {
                tracing::warn!("ReceiveMessage push without arguments");
                self.emit(ConnectionEvent::MalformedPush("missing payload".to_owned()));
                return;
            };
            match serde_json::from_value::<PushPayload>(payload) {
                Ok(push) => self.emit(ConnectionEvent::MessageReceived(push)),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable ReceiveMessage payload");
                    self.emit(ConnectionEvent::MalformedPush(e.to_string()));
                }
            }
        } else if target.eq_ignore_ascii_case(RECEIVE_EXCEPTION) {
            let message = match arguments.into_iter().next() {
                Some(Value::String(text)) => text,
                Some(other) => other.to_string(),
                None => "unspecified hub exception".to_owned(),
            };
            tracing::warn!(%message, "hub reported an exception");
            self.emit(ConnectionEvent::ServerException(message));
        } else {
            tracing::debug!(%target, "unhandled hub invocation");
        }
    }

    fn fail_pending(&mut self) {
        for (invocation_id, reply) in self.pending.drain() {
            if reply.send(Err(ChatError::ConnectionLost)).is_err() {
                tracing::debug!(%invocation_id, "invocation caller gone");
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("connection manager gone; event dropped");
        }
    }

    fn emit_state(&self, state: ConnectionState) {
        tracing::info!(%state, "hub connection state");
        self.emit(ConnectionEvent::StateChanged(state));
    }
}

/// Open a link and complete the hub handshake.
async fn establish(transport: &dyn Transport, url: &str, token: &str) -> Result<Established, ChatError> {
    let mut link = transport.open(url, token).await?;
    link.send_text(frames::handshake_request()).await?;

    let mut buffer = RecordBuffer::new();
    loop {
        let chunk = match link.recv_text().await {
            Some(chunk) => chunk?,
            None => return Err(ChatError::Handshake("link closed before handshake response".to_owned())),
        };
        let mut records = buffer.push(&chunk).into_iter();
        if let Some(first) = records.next() {
            frames::parse_handshake_response(&first).map_err(|e| ChatError::Handshake(e.to_string()))?;
            return Ok(Established { link, buffer, early: records.collect() });
        }
    }
}

async fn close_link(link: &mut dyn Link) {
    if tokio::time::timeout(CLOSE_GRACE, link.close()).await.is_err() {
        tracing::debug!("hub link close timed out");
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
