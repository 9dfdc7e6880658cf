//! Connection manager for the MIMP STOMP broker.
//!
//! This is the main entry point for SDK consumers. [`ConnectionManager`] owns
//! at most one broker session. `connect()` spawns the session task and returns
//! immediately; the task opens the transport, performs the STOMP handshake,
//! subscribes to the error and notification topics and emits [`Event`]s.
//!
//! ## Sessions and generations
//!
//! Every `connect()` and `disconnect()` bumps a generation counter. A session
//! task only publishes state and events while its generation is current, so a
//! session that was told to close (or was replaced) can never flip the UI.
//!
//! ## Reconnection
//!
//! A failed handshake or a dropped session is retried after
//! `ConnectConfig::reconnect_delay` for as long as the session is current.
//! While a retry is scheduled the state stays [`ConnectionState::Pending`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectConfig;
use crate::error::ConnectError;
use crate::event::{ConnectionState, Event};
use crate::payload;
use crate::stomp::{self, Command, Frame, Heartbeat, Incoming};
use crate::transport::{Received, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// How long a closing session waits for the broker's RECEIPT.
const DISCONNECT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on [`ConnectionManager::shutdown`]: the RECEIPT wait plus the close.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
/// Subscription id of the error topic.
pub const ERROR_SUBSCRIPTION: &str = "sub-0";
/// Subscription id of the notification topic.
pub const NOTIFICATION_SUBSCRIPTION: &str = "sub-1";

/// Owns the single optional broker session.
pub struct ConnectionManager {
    config: ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    generation: Arc<AtomicU64>,
    session: Option<Session>,
}

struct Session {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a manager and the receiver for its events.
    pub fn new(config: ConnectConfig) -> (Self, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let manager = Self {
            config,
            event_tx,
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            session: None,
        };
        (manager, event_rx)
    }

    /// Start a session.
    ///
    /// Rejected with [`ConnectError::AlreadyActive`] while a session is pending
    /// or connected; the existing session is left untouched. Must be called
    /// from within a Tokio runtime.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        let state = self.state();
        if state.is_active() {
            tracing::debug!("connect() ignored: session already {state}");
            return Err(ConnectError::AlreadyActive(state));
        }
        self.config.endpoint_url()?;

        // A leftover session here has already finished (failed or dropped).
        if let Some(old) = self.session.take() {
            old.task.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish_state(ConnectionState::Pending);

        let ctx = SessionContext {
            generation,
            current: self.generation.clone(),
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(self.config.clone(), ctx, shutdown_rx));
        self.session = Some(Session { shutdown_tx, task });
        tracing::info!("Connecting to {} (session {generation})", self.config.base_url);
        Ok(())
    }

    /// Ask the current session to close and reset the state to `Closed`.
    ///
    /// Fire-and-forget: the session sends DISCONNECT and closes the socket in
    /// the background. A pending handshake or scheduled retry is cancelled.
    /// Returns whether a live session existed; one that already ended on its
    /// own (failed, or dropped with retry off) does not count.
    pub fn disconnect(&mut self) -> bool {
        let existed = self.stop_session().is_some();
        self.publish_state(ConnectionState::Closed);
        tracing::info!("Disconnected");
        existed
    }

    /// Like [`disconnect`](Self::disconnect), but waits up to
    /// [`SHUTDOWN_TIMEOUT`] for the session to finish its DISCONNECT/RECEIPT
    /// exchange and close the socket. Use before the runtime goes away.
    pub async fn shutdown(&mut self) -> bool {
        let task = self.stop_session();
        self.publish_state(ConnectionState::Closed);
        let Some(task) = task else {
            return false;
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(_) => tracing::info!("Session closed"),
            Err(_) => tracing::warn!("Session did not close within {SHUTDOWN_TIMEOUT:?}"),
        }
        true
    }

    /// Invalidate the current generation and signal a live session to close.
    fn stop_session(&mut self) -> Option<JoinHandle<()>> {
        // A session only leaves the active states on its own way out, so a
        // Failed or Closed state means the task has ended or is ending.
        let live = self.state().is_active();
        // Invalidate first so nothing the old session publishes lands.
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.session.take() {
            Some(session) if live && !session.task.is_finished() => {
                let _ = session.shutdown_tx.send(());
                Some(session.task)
            }
            Some(_) | None => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions without consuming events.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn publish_state(&self, state: ConnectionState) {
        let old = self.state_tx.send_replace(state);
        if old != state {
            match self.event_tx.try_send(Event::StateChanged(state)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Event channel full, dropped state change to {state}");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// What a session task needs to publish, scoped to its generation.
#[derive(Clone)]
struct SessionContext {
    generation: u64,
    current: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    event_tx: mpsc::Sender<Event>,
}

impl SessionContext {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    async fn set_state(&self, state: ConnectionState) {
        // The generation check runs under the watch lock, so a concurrent
        // disconnect() always wins.
        let changed = self.state_tx.send_if_modified(|current| {
            if self.is_current() && *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        if changed {
            self.emit(Event::StateChanged(state)).await;
        }
    }

    async fn emit(&self, event: Event) {
        if self.is_current() {
            let _ = self.event_tx.send(event).await;
        }
    }
}

enum SessionEnd {
    /// disconnect() was called (or the manager went away).
    Requested,
    /// The broker or the network ended the session.
    Dropped(String),
}

struct Established {
    transport: Transport,
    heartbeat: Heartbeat,
    version: Option<String>,
    server: Option<String>,
}

async fn run_session(
    config: ConnectConfig,
    ctx: SessionContext,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        ctx.set_state(ConnectionState::Pending).await;

        let attempt = tokio::select! {
            result = tokio::time::timeout(config.handshake_timeout, handshake(&config)) => {
                result.unwrap_or(Err(ConnectError::HandshakeTimeout))
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("Handshake cancelled (session {})", ctx.generation);
                return;
            }
        };

        match attempt {
            Ok(established) => {
                tracing::info!(
                    "Connected to {} (STOMP {})",
                    established.transport.url(),
                    established.version.as_deref().unwrap_or("1.0")
                );
                ctx.set_state(ConnectionState::Connected).await;
                ctx.emit(Event::Connected {
                    version: established.version.clone(),
                    server: established.server.clone(),
                })
                .await;

                match run_established(established, &config, &ctx, &mut shutdown_rx).await {
                    SessionEnd::Requested => return,
                    SessionEnd::Dropped(reason) => {
                        tracing::warn!("Session dropped: {reason}");
                        ctx.emit(Event::Disconnected { reason }).await;
                        if !config.reconnects() {
                            ctx.set_state(ConnectionState::Closed).await;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Handshake failed: {e}");
                ctx.emit(Event::HandshakeFailed {
                    reason: e.to_string(),
                })
                .await;
                if !config.reconnects() {
                    ctx.set_state(ConnectionState::Failed).await;
                    return;
                }
            }
        }

        if !ctx.is_current() {
            return;
        }
        ctx.set_state(ConnectionState::Pending).await;
        ctx.emit(Event::Reconnecting {
            delay: config.reconnect_delay,
        })
        .await;
        tracing::debug!("Retrying in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = &mut shutdown_rx => return,
        }
    }
}

/// Open the transport, send CONNECT and wait for CONNECTED.
async fn handshake(config: &ConnectConfig) -> Result<Established, ConnectError> {
    let mut transport = Transport::open(config).await?;
    let connect = Frame::connect(&config.stomp_host(), config.heartbeat);
    transport.send(&connect.encode()).await?;

    loop {
        let payloads = match transport.recv().await? {
            Received::Payloads(payloads) => payloads,
            Received::Heartbeat => continue,
            Received::Closed { code, reason } => {
                return Err(ConnectError::ClosedDuringHandshake { code, reason });
            }
        };
        for payload in payloads {
            for item in stomp::decode(&payload)? {
                let Incoming::Frame(frame) = item else {
                    continue;
                };
                match frame.command {
                    Command::Connected => {
                        let server_hb = frame
                            .get("heart-beat")
                            .and_then(Heartbeat::parse)
                            .unwrap_or(Heartbeat::DISABLED);
                        let heartbeat = config.heartbeat.negotiate(server_hb);
                        tracing::debug!("Negotiated heart-beat {}", heartbeat.to_header());
                        return Ok(Established {
                            version: frame.get("version").map(str::to_string),
                            server: frame.get("server").map(str::to_string),
                            heartbeat,
                            transport,
                        });
                    }
                    Command::Error => {
                        return Err(ConnectError::Rejected(error_message(&frame)));
                    }
                    other => tracing::debug!("Ignoring {other} before CONNECTED"),
                }
            }
        }
    }
}

async fn run_established(
    established: Established,
    config: &ConnectConfig,
    ctx: &SessionContext,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let Established {
        mut transport,
        heartbeat,
        ..
    } = established;

    let subscriptions = [
        (ERROR_SUBSCRIPTION, config.error_topic.as_str()),
        (NOTIFICATION_SUBSCRIPTION, config.notification_topic.as_str()),
    ];
    for (id, destination) in subscriptions {
        if let Err(e) = transport.send(&Frame::subscribe(id, destination).encode()).await {
            return SessionEnd::Dropped(format!("subscribe to {destination} failed: {e}"));
        }
        tracing::debug!("Subscribed to {destination} as {id}");
    }

    let mut last_tx = Instant::now();
    let mut last_rx = Instant::now();

    loop {
        tokio::select! {
            received = transport.recv() => {
                last_rx = Instant::now();
                let payloads = match received {
                    Ok(Received::Payloads(payloads)) => payloads,
                    Ok(Received::Heartbeat) => continue,
                    Ok(Received::Closed { code, reason }) => {
                        return SessionEnd::Dropped(format!("transport closed ({code}: {reason})"));
                    }
                    Err(e) => return SessionEnd::Dropped(e.to_string()),
                };
                for payload in payloads {
                    let items = match stomp::decode(&payload) {
                        Ok(items) => items,
                        Err(e) => {
                            tracing::warn!("Ignoring undecodable STOMP payload: {e}");
                            continue;
                        }
                    };
                    for item in items {
                        if let Incoming::Frame(frame) = item
                            && let Some(end) = dispatch(frame, config, ctx).await
                        {
                            return end;
                        }
                    }
                }
            }
            _ = &mut *shutdown_rx => {
                close_gracefully(&mut transport, ctx.generation).await;
                return SessionEnd::Requested;
            }
            _ = tokio::time::sleep_until(last_tx + heartbeat.outgoing), if !heartbeat.outgoing.is_zero() => {
                if let Err(e) = transport.send(stomp::HEARTBEAT_EOL).await {
                    return SessionEnd::Dropped(format!("heart-beat send failed: {e}"));
                }
                last_tx = Instant::now();
            }
            _ = tokio::time::sleep_until(last_rx + heartbeat.incoming * 2), if !heartbeat.incoming.is_zero() => {
                return SessionEnd::Dropped("no heart-beat from broker".to_string());
            }
        }
    }
}

/// Route one inbound frame. Returns `Some` when the session must end.
async fn dispatch(frame: Frame, config: &ConnectConfig, ctx: &SessionContext) -> Option<SessionEnd> {
    match frame.command {
        Command::Message => {
            let destination = frame.get("destination").unwrap_or_default().to_string();
            let subscription = frame.get("subscription");
            let is_error = subscription == Some(ERROR_SUBSCRIPTION)
                || (subscription.is_none() && destination == config.error_topic);
            let is_notification = subscription == Some(NOTIFICATION_SUBSCRIPTION)
                || (subscription.is_none() && destination == config.notification_topic);

            if is_error {
                match payload::decode_error_notice(&frame.body) {
                    Ok(details) => {
                        tracing::info!(
                            "Alert on {destination} ({}, status {:?}): {}",
                            details.problem_type(),
                            details.status,
                            details.detail
                        );
                        ctx.emit(Event::Alert(details)).await;
                    }
                    Err(error) => {
                        tracing::warn!("Rejected payload on {destination}: {error}");
                        ctx.emit(Event::PayloadRejected { destination, error }).await;
                    }
                }
            } else if is_notification {
                match payload::decode_notification(&frame.body) {
                    Ok(value) => ctx.emit(Event::Notification(value)).await,
                    Err(error) => {
                        tracing::warn!("Rejected payload on {destination}: {error}");
                        ctx.emit(Event::PayloadRejected { destination, error }).await;
                    }
                }
            } else {
                tracing::debug!("MESSAGE for unknown subscription {subscription:?} on {destination}");
            }
            None
        }
        Command::Error => {
            let message = error_message(&frame);
            tracing::warn!("Broker sent ERROR: {message}");
            ctx.emit(Event::ServerError {
                message: message.clone(),
            })
            .await;
            Some(SessionEnd::Dropped(format!("broker error: {message}")))
        }
        Command::Receipt => {
            tracing::debug!("RECEIPT {}", frame.get("receipt-id").unwrap_or_default());
            None
        }
        other => {
            tracing::debug!("Ignoring unexpected {other} frame");
            None
        }
    }
}

/// Send DISCONNECT, wait briefly for the RECEIPT, then close the socket.
async fn close_gracefully(transport: &mut Transport, generation: u64) {
    let receipt = format!("close-{generation}");
    if let Err(e) = transport.send(&Frame::disconnect(&receipt).encode()).await {
        tracing::debug!("DISCONNECT send failed: {e}");
        transport.close().await;
        return;
    }

    let wait_for_receipt = async {
        loop {
            let payloads = match transport.recv().await {
                Ok(Received::Payloads(payloads)) => payloads,
                Ok(Received::Heartbeat) => continue,
                Ok(Received::Closed { .. }) | Err(_) => return,
            };
            for payload in payloads {
                let Ok(items) = stomp::decode(&payload) else {
                    continue;
                };
                let acknowledged = items.iter().any(|item| {
                    matches!(item, Incoming::Frame(f)
                        if f.command == Command::Receipt && f.get("receipt-id") == Some(receipt.as_str()))
                });
                if acknowledged {
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_RECEIPT_TIMEOUT, wait_for_receipt)
        .await
        .is_err()
    {
        tracing::debug!("No RECEIPT for {receipt}, closing anyway");
    }
    transport.close().await;
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> ConnectConfig {
        ConnectConfig {
            // Port 9 (discard) on loopback is closed in test environments.
            base_url: "http://127.0.0.1:9".to_string(),
            reconnect_delay: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn starts_closed() {
        let (manager, _events) = ConnectionManager::new(ConnectConfig::default());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn connect_goes_pending_immediately() {
        let (mut manager, mut events) = ConnectionManager::new(unreachable_config());
        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Pending);
        assert!(!manager.is_connected());
        assert!(matches!(
            events.recv().await,
            Some(Event::StateChanged(ConnectionState::Pending))
        ));
        manager.disconnect();
    }

    #[tokio::test]
    async fn second_connect_while_pending_is_rejected() {
        let (mut manager, _events) = ConnectionManager::new(unreachable_config());
        manager.connect().unwrap();
        assert_eq!(
            manager.connect(),
            Err(ConnectError::AlreadyActive(ConnectionState::Pending))
        );
        assert_eq!(manager.state(), ConnectionState::Pending);
        manager.disconnect();
    }

    #[tokio::test]
    async fn disconnect_without_session_is_noop() {
        let (mut manager, _events) = ConnectionManager::new(ConnectConfig::default());
        assert!(!manager.disconnect());
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_handshake() {
        let (mut manager, _events) = ConnectionManager::new(unreachable_config());
        manager.connect().unwrap();
        assert!(manager.disconnect());
        assert_eq!(manager.state(), ConnectionState::Closed);

        // The cancelled session must not move the state again.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.state(), ConnectionState::Closed);

        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Pending);
        manager.disconnect();
    }

    #[tokio::test]
    async fn shutdown_waits_for_pending_session() {
        let (mut manager, _events) = ConnectionManager::new(unreachable_config());
        manager.connect().unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), manager.shutdown())
            .await
            .expect("shutdown exceeded its bound");
        assert!(closed);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.shutdown().await);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_up_front() {
        let config = ConnectConfig {
            base_url: "::nope::".to_string(),
            ..Default::default()
        };
        let (mut manager, _events) = ConnectionManager::new(config);
        assert!(matches!(manager.connect(), Err(ConnectError::InvalidUrl(_))));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn handshake_failure_without_retry_ends_failed() {
        let config = ConnectConfig {
            reconnect_delay: Duration::ZERO,
            handshake_timeout: Duration::from_secs(2),
            ..unreachable_config()
        };
        let (mut manager, mut events) = ConnectionManager::new(config);
        let mut state = manager.subscribe_state();
        manager.connect().unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Failed),
        )
        .await
        .expect("timed out waiting for Failed")
        .unwrap();

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::HandshakeFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);

        // The session ended on its own; nothing live is left to disconnect.
        assert!(!manager.disconnect());
        assert_eq!(manager.state(), ConnectionState::Closed);

        // Failed is not active, so a fresh connect is allowed.
        manager.connect().unwrap();
        manager.disconnect();
    }
}
