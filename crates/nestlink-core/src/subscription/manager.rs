//! Subscription transport manager
//!
//! Owns the one persistent socket shared by every subscription. A single
//! background task drives the connection state machine:
//!
//! ```text
//! Idle -> Connecting -> Open -> Reconnecting -> Open ...
//!                         \          \
//!                          +----------+--> Closed
//! ```
//!
//! Callers talk to the task over a command channel and observe the state
//! through a `watch` channel. The task starts lazily on the first subscribe.
//! Closes with an auth-rejection code, or more consecutive failures than the
//! reconnect budget allows, end in `Closed`, which only [`SubscriptionManager::restart`]
//! leaves.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::decorator::ComplianceHeaders;
use crate::auth::refresh::RefreshController;
use crate::http::error::ClientError;
use crate::operation::{GraphQlResponse, Operation, OperationKind};
use crate::subscription::protocol::{
    is_auth_rejection, ClientMessage, ServerMessage, CLOSE_ABNORMAL, CLOSE_INIT_TIMEOUT,
    CLOSE_NORMAL,
};
use crate::subscription::socket::{connect_with_timeout, SocketConnection, SocketConnector, SocketEvent};
use crate::{Error, Result};

/// Lifecycle of the subscription socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started yet
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Terminal until restarted
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Reconnect schedule for the subscription socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive reconnect attempts before giving up
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomization factor applied by the backoff (0 disables jitter)
    pub jitter: f64,
    /// How long to wait for `connection_ack` after `connection_init`
    pub ack_timeout_ms: u64,
    /// How long to wait for the socket handshake
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 16_000,
            jitter: 0.0,
            ack_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff yielding the delay before reconnect 1, 2, ...
    pub fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.initial_delay_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            randomization_factor: self.jitter,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay before reconnect `attempt` (1-based), without jitter
    #[cfg(test)]
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.multiplier < 1.0 {
            return Err("Reconnect multiplier must be at least 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err("Reconnect jitter must be in [0, 1)".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("Initial reconnect delay exceeds the cap".to_string());
        }
        Ok(())
    }
}

type EventSink = mpsc::UnboundedSender<Result<GraphQlResponse>>;

enum Command {
    Subscribe {
        id: String,
        operation: Arc<Operation>,
        sink: EventSink,
    },
    Unsubscribe {
        id: String,
    },
}

/// What the connection task needs; shared with it
struct Core {
    url: Url,
    connector: Arc<dyn SocketConnector>,
    refresh: RefreshController,
    buffer: Duration,
    compliance: ComplianceHeaders,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Control {
    commands: Option<mpsc::UnboundedSender<Command>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    last_close_code: Option<u16>,
}

/// Multiplexes subscriptions over one reconnecting socket
#[derive(Clone)]
pub struct SubscriptionManager {
    core: Arc<Core>,
    control: Arc<Mutex<Control>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(
        url: Url,
        connector: Arc<dyn SocketConnector>,
        refresh: RefreshController,
        buffer: Duration,
        compliance: ComplianceHeaders,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            core: Arc::new(Core {
                url,
                connector,
                refresh,
                buffer,
                compliance,
                policy,
                state,
            }),
            control: Arc::new(Mutex::new(Control::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state.borrow()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.core.state.subscribe()
    }

    pub fn url(&self) -> &Url {
        &self.core.url
    }

    /// Start a subscription, opening the socket if needed
    pub fn subscribe(&self, operation: Operation) -> Result<SubscriptionStream> {
        if operation.kind != OperationKind::Subscription {
            return Err(Error::InvalidOperation {
                message: format!("'{}' is a {}, not a subscription", operation.name(), operation.kind),
            });
        }

        let mut control = self.control();
        if self.state() == ConnectionState::Closed {
            return Err(Error::Subscription {
                message: "subscription transport is closed; restart it first".to_string(),
                close_code: control.last_close_code,
            });
        }

        let commands = match control.commands.as_ref() {
            Some(commands) => commands.clone(),
            None => self.start(&mut control),
        };
        drop(control);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let name = operation.name().to_string();
        let (sink, events) = mpsc::unbounded_channel();
        commands
            .send(Command::Subscribe {
                id: id.clone(),
                operation: Arc::new(operation),
                sink,
            })
            .map_err(|_| Error::Subscription {
                message: "subscription transport is closed".to_string(),
                close_code: self.control().last_close_code,
            })?;

        debug!(id = %id, operation = %name, "Subscription requested");
        Ok(SubscriptionStream {
            id,
            events,
            commands,
            finished: false,
        })
    }

    /// Stop the transport.
    ///
    /// Active subscriptions end with an error. Safe to call repeatedly and
    /// from `Closed`.
    pub async fn stop(&self) {
        let task = {
            let mut control = self.control();
            control.cancel.cancel();
            control.commands = None;
            control.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Subscription task panicked");
                }
            }
        }
        self.core.state.send_replace(ConnectionState::Closed);
    }

    /// Leave `Closed` so the next subscribe reconnects. No-op in other states.
    pub fn restart(&self) {
        let mut control = self.control();
        if self.state() != ConnectionState::Closed {
            return;
        }
        if let Some(task) = control.task.take() {
            task.abort();
        }
        *control = Control::default();
        self.core.state.send_replace(ConnectionState::Idle);
        info!("Subscription transport re-armed");
    }

    fn start(&self, control: &mut Control) -> mpsc::UnboundedSender<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::clone(&self.core);
        let cancel = control.cancel.clone();
        let shared_control = Arc::clone(&self.control);

        control.task = Some(tokio::spawn(async move {
            let code = ConnectionTask::new(core, rx, cancel).run().await;
            if let Some(code) = code {
                lock(&shared_control).last_close_code = Some(code);
            }
        }));
        control.commands = Some(tx.clone());
        tx
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }
}

fn lock(control: &Mutex<Control>) -> MutexGuard<'_, Control> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("url", &self.core.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

/// Payloads of one subscription.
///
/// Ends after a `complete` frame, after an error, or when the transport
/// closes for good. Dropping it unsubscribes.
pub struct SubscriptionStream {
    id: String,
    events: mpsc::UnboundedReceiver<Result<GraphQlResponse>>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl SubscriptionStream {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for SubscriptionStream {
    type Item = Result<GraphQlResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.events.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.finished = true;
        }
        polled
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.commands.send(Command::Unsubscribe {
                id: self.id.clone(),
            });
        }
    }
}

impl fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream").field("id", &self.id).finish()
    }
}

struct Subscriber {
    operation: Arc<Operation>,
    sink: EventSink,
}

/// How one connection ended
enum SessionEnd {
    Closed { code: u16, reason: String },
    Stopped,
    /// Every handle is gone
    Abandoned,
}

/// State owned by the background task
struct ConnectionTask {
    core: Arc<Core>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    subscribers: BTreeMap<String, Subscriber>,
}

impl ConnectionTask {
    fn new(
        core: Arc<Core>,
        commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core,
            commands,
            cancel,
            subscribers: BTreeMap::new(),
        }
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.core.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Subscription transport state");
        }
    }

    /// Drive connections until the transport closes for good. Returns the
    /// close code that ended it, if any.
    async fn run(mut self) -> Option<u16> {
        let mut backoff = self.core.policy.backoff();
        let mut retries = 0u32;

        let end = loop {
            self.publish(if retries == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let (code, reason) = match self.session(&mut backoff, &mut retries).await {
                SessionEnd::Closed { code, reason } => (code, reason),
                other => break other,
            };

            if is_auth_rejection(code) {
                warn!(code, reason = %reason, "Subscription socket rejected credentials");
                break SessionEnd::Closed { code, reason };
            }
            if retries >= self.core.policy.max_attempts {
                error!(code, retries, "Subscription socket gave up reconnecting");
                break SessionEnd::Closed { code, reason };
            }

            retries += 1;
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| Duration::from_millis(self.core.policy.max_delay_ms));
            self.publish(ConnectionState::Reconnecting);
            warn!(
                code,
                reason = %reason,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                "Subscription socket closed, reconnecting"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break SessionEnd::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let (message, code) = match end {
            SessionEnd::Closed { code, reason } => (
                format!("subscription socket closed ({}): {}", code, reason),
                Some(code),
            ),
            SessionEnd::Stopped => ("subscription transport stopped".to_string(), None),
            SessionEnd::Abandoned => ("subscription transport dropped".to_string(), None),
        };
        self.publish(ConnectionState::Closed);
        self.shut_down(&message, code);
        code
    }

    /// One connection from handshake to close
    async fn session(&mut self, backoff: &mut ExponentialBackoff, retries: &mut u32) -> SessionEnd {
        let params = self.connection_params().await;

        let connect = connect_with_timeout(
            self.core.connector.as_ref(),
            &self.core.url,
            self.core.policy.connect_timeout(),
        );
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Stopped,
            result = connect => result,
        };
        let SocketConnection { mut sink, mut events } = match connected {
            Ok(connection) => connection,
            Err(failure) => {
                return SessionEnd::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: failure.message,
                }
            }
        };

        let init = ClientMessage::ConnectionInit { payload: params };
        if let Err(end) = send(sink.as_mut(), &init).await {
            return end;
        }

        let ack_deadline = tokio::time::sleep(self.core.policy.ack_timeout());
        tokio::pin!(ack_deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    sink.close(CLOSE_NORMAL, "client stopped").await;
                    return SessionEnd::Stopped;
                }
                _ = &mut ack_deadline => {
                    sink.close(CLOSE_INIT_TIMEOUT, "connection_ack timeout").await;
                    return SessionEnd::Closed {
                        code: CLOSE_INIT_TIMEOUT,
                        reason: "connection_ack timeout".to_string(),
                    };
                }
                event = events.recv() => match event {
                    Some(SocketEvent::Text(text)) => match ServerMessage::parse(&text) {
                        Ok(ServerMessage::ConnectionAck { .. }) => break,
                        Ok(ServerMessage::Ping { .. }) => {
                            if let Err(end) = send(sink.as_mut(), &ClientMessage::Pong { payload: None }).await {
                                return end;
                            }
                        }
                        Ok(other) => debug!(?other, "Ignoring frame before connection_ack"),
                        Err(e) => warn!(error = %e, "Unreadable frame from subscription socket"),
                    },
                    Some(SocketEvent::Closed { code, reason }) => return SessionEnd::Closed { code, reason },
                    None => return dropped(),
                },
            }
        }

        *retries = 0;
        backoff.reset();
        self.publish(ConnectionState::Open);
        info!(url = %self.core.url, subscriptions = self.subscribers.len(), "Subscription socket open");

        // Everything still active is re-sent under its original id
        let resubscribe: Vec<ClientMessage> = self
            .subscribers
            .iter()
            .filter_map(|(id, sub)| ClientMessage::subscribe(id, &sub.operation).ok())
            .collect();
        for message in &resubscribe {
            if let Err(end) = send(sink.as_mut(), message).await {
                return end;
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    sink.close(CLOSE_NORMAL, "client stopped").await;
                    return SessionEnd::Stopped;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        sink.close(CLOSE_NORMAL, "client dropped").await;
                        return SessionEnd::Abandoned;
                    };
                    if let Some(message) = self.apply(command) {
                        if let Err(end) = send(sink.as_mut(), &message).await {
                            return end;
                        }
                    }
                }
                event = events.recv() => match event {
                    Some(SocketEvent::Text(text)) => {
                        if let Some(reply) = self.dispatch(&text) {
                            if let Err(end) = send(sink.as_mut(), &reply).await {
                                return end;
                            }
                        }
                    }
                    Some(SocketEvent::Closed { code, reason }) => return SessionEnd::Closed { code, reason },
                    None => return dropped(),
                },
            }
        }
    }

    /// `connection_init` payload, built from the current token
    async fn connection_params(&self) -> Value {
        let mut params = self.core.compliance.to_json();
        match self.core.refresh.ensure_valid_token(self.core.buffer).await {
            Ok(Some(token)) => {
                params.insert("authorization".to_string(), Value::String(format!("Bearer {}", token)));
            }
            Ok(None) => debug!("Connecting subscription socket without a session"),
            Err(e) => warn!(error = %e, "Could not read access token for subscription socket"),
        }
        Value::Object(params)
    }

    /// Apply a caller command; returns the frame to send, if any
    fn apply(&mut self, command: Command) -> Option<ClientMessage> {
        match command {
            Command::Subscribe { id, operation, sink } => {
                let message = match ClientMessage::subscribe(&id, &operation) {
                    Ok(message) => message,
                    Err(e) => {
                        let _ = sink.send(Err(e));
                        return None;
                    }
                };
                self.subscribers.insert(id, Subscriber { operation, sink });
                Some(message)
            }
            Command::Unsubscribe { id } => self
                .subscribers
                .remove(&id)
                .map(|_| ClientMessage::Complete { id }),
        }
    }

    /// Route a server frame; returns a reply frame, if any
    fn dispatch(&mut self, text: &str) -> Option<ClientMessage> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Unreadable frame from subscription socket");
                return None;
            }
        };

        match message {
            ServerMessage::Next { id, payload } => {
                let sub = self.subscribers.get(&id)?;
                let name = sub.operation.name().to_string();
                let item = payload.into_result().map_err(|e| Error::operation(name, e));
                if sub.sink.send(item).is_err() {
                    self.subscribers.remove(&id);
                    return Some(ClientMessage::Complete { id });
                }
                None
            }
            ServerMessage::Error { id, payload } => {
                if let Some(sub) = self.subscribers.remove(&id) {
                    let failure = ClientError::from_graphql_errors(&payload);
                    let _ = sub.sink.send(Err(Error::operation(sub.operation.name(), failure)));
                }
                None
            }
            ServerMessage::Complete { id } => {
                self.subscribers.remove(&id);
                None
            }
            ServerMessage::Ping { .. } => Some(ClientMessage::Pong { payload: None }),
            ServerMessage::Pong { .. } | ServerMessage::ConnectionAck { .. } => None,
        }
    }

    /// Fail every subscriber and every queued subscribe
    fn shut_down(&mut self, message: &str, close_code: Option<u16>) {
        let failure = || Error::Subscription {
            message: message.to_string(),
            close_code,
        };

        for (_, sub) in std::mem::take(&mut self.subscribers) {
            let _ = sub.sink.send(Err(failure()));
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Subscribe { sink, .. } = command {
                let _ = sink.send(Err(failure()));
            }
        }
    }
}

async fn send(
    sink: &mut dyn crate::subscription::socket::SocketSink,
    message: &ClientMessage,
) -> std::result::Result<(), SessionEnd> {
    let text = message.to_text().map_err(|e| SessionEnd::Closed {
        code: CLOSE_ABNORMAL,
        reason: e.to_string(),
    })?;
    sink.send(text).await.map_err(|failure| SessionEnd::Closed {
        code: CLOSE_ABNORMAL,
        reason: failure.message,
    })
}

fn dropped() -> SessionEnd {
    SessionEnd::Closed {
        code: CLOSE_ABNORMAL,
        reason: "connection dropped".to_string(),
    }
}
