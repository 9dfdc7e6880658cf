//! End-to-end tests against an in-process STOMP broker.
//!
//! Tests cover:
//! - CONNECT/CONNECTED over SockJS and plain WebSocket framing
//! - Subscriptions to the error and notification topics
//! - Alert dispatch and rejection of malformed error payloads
//! - DISCONNECT with receipt on a requested close, and a bounded shutdown
//! - Heart-beat sending and the inbound heart-beat watchdog
//! - Rejected handshakes, broker ERROR frames and reconnection

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::{Mutex, broadcast, mpsc};

use mimp_sdk::stomp::{self, Command, Frame, Incoming};
use mimp_sdk::{
    ConnectConfig, ConnectionManager, ConnectionState, Event, Heartbeat, PayloadError,
    TransportKind,
};

const WAIT: Duration = Duration::from_secs(5);

/// How the fake broker answers CONNECT.
#[derive(Clone)]
struct Script {
    reject_connect: bool,
    heart_beat: &'static str,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reject_connect: false,
            heart_beat: "0,0",
        }
    }
}

#[derive(Clone)]
struct BrokerState {
    script: Script,
    received: mpsc::UnboundedSender<Incoming>,
    push: broadcast::Sender<String>,
    sockjs_paths: Arc<Mutex<Vec<(String, String)>>>,
}

struct FakeBroker {
    base_url: String,
    received: mpsc::UnboundedReceiver<Incoming>,
    push: broadcast::Sender<String>,
    sockjs_paths: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeBroker {
    async fn start(script: Script) -> Self {
        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(16);
        let sockjs_paths = Arc::new(Mutex::new(Vec::new()));
        let state = BrokerState {
            script,
            received: received_tx,
            push: push.clone(),
            sockjs_paths: sockjs_paths.clone(),
        };

        let app = Router::new()
            .route("/mimp-ws", get(raw_upgrade))
            .route("/mimp-ws/{server}/{session}/websocket", get(sockjs_upgrade))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            received,
            push,
            sockjs_paths,
        }
    }

    fn config(&self, transport: TransportKind) -> ConnectConfig {
        ConnectConfig {
            base_url: self.base_url.clone(),
            transport,
            heartbeat: Heartbeat::DISABLED,
            reconnect_delay: Duration::ZERO,
            handshake_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Wait for the next frame the client sent with `command`.
    async fn expect_frame(&mut self, command: Command) -> Frame {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.received.recv().await {
                    Some(Incoming::Frame(frame)) if frame.command == command => return frame,
                    Some(_) => continue,
                    None => panic!("broker channel closed"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {command}"))
    }

    async fn expect_heartbeat(&mut self) {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.received.recv().await {
                    Some(Incoming::Heartbeat) => return,
                    Some(_) => continue,
                    None => panic!("broker channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for a heart-beat");
    }

    fn publish(&self, subscription: &str, destination: &str, body: &str) {
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .header("message-id", "m-1")
            .header("content-type", "application/json")
            .body(body);
        self.push.send(frame.encode()).unwrap();
    }

    fn send_error(&self, message: &str) {
        let frame = Frame::new(Command::Error).header("message", message);
        self.push.send(frame.encode()).unwrap();
    }
}

async fn raw_upgrade(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> Response {
    ws.on_upgrade(move |socket| serve_session(socket, state, false))
}

async fn sockjs_upgrade(
    ws: WebSocketUpgrade,
    Path((server, session)): Path<(String, String)>,
    State(state): State<BrokerState>,
) -> Response {
    state.sockjs_paths.lock().await.push((server, session));
    ws.on_upgrade(move |socket| serve_session(socket, state, true))
}

async fn send_stomp(socket: &mut WebSocket, sockjs: bool, payload: &str) -> bool {
    let text = if sockjs {
        format!("a{}", serde_json::to_string(&[payload]).unwrap())
    } else {
        payload.to_string()
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn serve_session(mut socket: WebSocket, state: BrokerState, sockjs: bool) {
    if sockjs && socket.send(Message::Text("o".into())).await.is_err() {
        return;
    }
    let mut push = state.push.subscribe();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                };
                let payloads: Vec<String> = if sockjs {
                    serde_json::from_str(&text).unwrap_or_default()
                } else {
                    vec![text]
                };
                for payload in payloads {
                    let Ok(items) = stomp::decode(&payload) else {
                        continue;
                    };
                    for item in items {
                        let _ = state.received.send(item.clone());
                        let Incoming::Frame(frame) = item else {
                            continue;
                        };
                        match frame.command {
                            Command::Connect | Command::Stomp => {
                                let reply = if state.script.reject_connect {
                                    Frame::new(Command::Error)
                                        .header("message", "bad credentials")
                                } else {
                                    Frame::new(Command::Connected)
                                        .header("version", "1.2")
                                        .header("heart-beat", state.script.heart_beat)
                                        .header("server", "fake-broker/1.0")
                                };
                                if !send_stomp(&mut socket, sockjs, &reply.encode()).await
                                    || state.script.reject_connect
                                {
                                    return;
                                }
                            }
                            Command::Disconnect => {
                                if let Some(receipt) = frame.get("receipt") {
                                    let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
                                    let _ = send_stomp(&mut socket, sockjs, &reply.encode()).await;
                                }
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
            pushed = push.recv() => {
                let Ok(payload) = pushed else {
                    return;
                };
                if !send_stomp(&mut socket, sockjs, &payload).await {
                    return;
                }
            }
        }
    }
}

/// Receive events until one matches, skipping the rest.
async fn next_event(
    events: &mut mpsc::Receiver<Event>,
    mut matches: impl FnMut(&Event) -> bool,
) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Connect and wait until both subscriptions reached the broker.
async fn connect_and_subscribe(
    broker: &mut FakeBroker,
    config: ConnectConfig,
) -> (ConnectionManager, mpsc::Receiver<Event>) {
    let (mut manager, mut events) = ConnectionManager::new(config);
    manager.connect().unwrap();
    next_event(&mut events, |e| matches!(e, Event::Connected { .. })).await;
    broker.expect_frame(Command::Subscribe).await;
    broker.expect_frame(Command::Subscribe).await;
    (manager, events)
}

#[tokio::test]
async fn sockjs_connect_reaches_connected_and_subscribes() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let (mut manager, mut events) = ConnectionManager::new(broker.config(TransportKind::SockJs));
    manager.connect().unwrap();

    let connected = next_event(&mut events, |e| matches!(e, Event::Connected { .. })).await;
    let Event::Connected { version, server } = connected else {
        unreachable!()
    };
    assert_eq!(version.as_deref(), Some("1.2"));
    assert_eq!(server.as_deref(), Some("fake-broker/1.0"));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert!(manager.is_connected());

    let connect = broker.expect_frame(Command::Connect).await;
    assert_eq!(connect.get("accept-version"), Some("1.1,1.2"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));

    let first = broker.expect_frame(Command::Subscribe).await;
    let second = broker.expect_frame(Command::Subscribe).await;
    assert_eq!(first.get("id"), Some("sub-0"));
    assert_eq!(first.get("destination"), Some("/topic/error"));
    assert_eq!(second.get("id"), Some("sub-1"));
    assert_eq!(second.get("destination"), Some("/topic/mimp"));

    let paths = broker.sockjs_paths.lock().await.clone();
    assert_eq!(paths.len(), 1);
    let (server_id, session_id) = &paths[0];
    assert_eq!(server_id.len(), 3);
    assert!(server_id.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(session_id.len(), 8);
    assert!(session_id.chars().all(|c| c.is_ascii_alphanumeric()));

    manager.disconnect();
}

#[tokio::test]
async fn plain_websocket_transport_connects() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::WebSocket);
    let (mut manager, _events) = connect_and_subscribe(&mut broker, config).await;
    assert!(manager.is_connected());
    assert!(broker.sockjs_paths.lock().await.is_empty());
    manager.disconnect();
}

#[tokio::test]
async fn error_topic_message_raises_alert_with_detail() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::SockJs);
    let (mut manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    broker.publish(
        "sub-0",
        "/topic/error",
        r#"{"message":{"detail":"Connection refused","status":500,"title":"Resource access error"}}"#,
    );
    let alert = next_event(&mut events, |e| matches!(e, Event::Alert(_))).await;
    let Event::Alert(details) = alert else {
        unreachable!()
    };
    assert_eq!(details.detail, "Connection refused");
    assert_eq!(details.status, Some(500));

    manager.disconnect();
}

#[tokio::test]
async fn error_topic_without_message_is_rejected() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::SockJs);
    let (mut manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    broker.publish("sub-0", "/topic/error", r#"{"detail":"X"}"#);
    let event = next_event(&mut events, |e| {
        matches!(e, Event::PayloadRejected { .. } | Event::Alert(_))
    })
    .await;
    match event {
        Event::PayloadRejected { destination, error } => {
            assert_eq!(destination, "/topic/error");
            assert_eq!(error, PayloadError::MissingField("message"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    // A bad payload does not end the session.
    assert!(manager.is_connected());

    manager.disconnect();
}

#[tokio::test]
async fn notification_topic_is_decoded_and_bad_json_rejected() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::WebSocket);
    let (mut manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    broker.publish("sub-1", "/topic/mimp", r#"{"kind":"status","ok":true}"#);
    let event = next_event(&mut events, |e| matches!(e, Event::Notification(_))).await;
    let Event::Notification(value) = event else {
        unreachable!()
    };
    assert_eq!(value["kind"], "status");

    broker.publish("sub-1", "/topic/mimp", "not json");
    let event = next_event(&mut events, |e| matches!(e, Event::PayloadRejected { .. })).await;
    let Event::PayloadRejected { destination, error } = event else {
        unreachable!()
    };
    assert_eq!(destination, "/topic/mimp");
    assert!(matches!(error, PayloadError::InvalidJson(_)));

    manager.disconnect();
}

#[tokio::test]
async fn disconnect_sends_disconnect_with_receipt() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::SockJs);
    let (mut manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    assert!(manager.disconnect());
    assert_eq!(manager.state(), ConnectionState::Closed);

    let frame = broker.expect_frame(Command::Disconnect).await;
    let receipt = frame.get("receipt").unwrap();
    assert!(receipt.starts_with("close-"), "receipt was {receipt}");

    next_event(&mut events, |e| {
        matches!(e, Event::StateChanged(ConnectionState::Closed))
    })
    .await;
    // The requested close is not reported as a drop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, Event::Disconnected { .. }),
            "unexpected {event:?}"
        );
    }
}

#[tokio::test]
async fn shutdown_waits_for_receipt_and_socket_close() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = broker.config(TransportKind::SockJs);
    let (mut manager, _events) = connect_and_subscribe(&mut broker, config).await;

    let closed = tokio::time::timeout(WAIT, manager.shutdown())
        .await
        .expect("shutdown exceeded its bound");
    assert!(closed);
    assert_eq!(manager.state(), ConnectionState::Closed);

    let frame = broker.expect_frame(Command::Disconnect).await;
    assert!(frame.get("receipt").is_some());
    assert!(!manager.shutdown().await);
}

#[tokio::test]
async fn outgoing_heartbeats_follow_negotiated_interval() {
    let mut broker = FakeBroker::start(Script {
        heart_beat: "0,100",
        ..Default::default()
    })
    .await;
    let config = ConnectConfig {
        heartbeat: Heartbeat {
            outgoing: Duration::from_millis(50),
            incoming: Duration::ZERO,
        },
        ..broker.config(TransportKind::SockJs)
    };
    let (mut manager, _events) = connect_and_subscribe(&mut broker, config).await;

    broker.expect_heartbeat().await;
    broker.expect_heartbeat().await;
    assert!(manager.is_connected());

    manager.disconnect();
}

#[tokio::test]
async fn silent_broker_trips_heartbeat_watchdog() {
    let mut broker = FakeBroker::start(Script {
        heart_beat: "100,0",
        ..Default::default()
    })
    .await;
    let config = ConnectConfig {
        heartbeat: Heartbeat {
            outgoing: Duration::ZERO,
            incoming: Duration::from_millis(100),
        },
        ..broker.config(TransportKind::WebSocket)
    };
    let (manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    let event = next_event(&mut events, |e| matches!(e, Event::Disconnected { .. })).await;
    let Event::Disconnected { reason } = event else {
        unreachable!()
    };
    assert!(reason.contains("heart-beat"), "reason was {reason}");

    // Retry is disabled, so the drop ends in Closed.
    next_event(&mut events, |e| {
        matches!(e, Event::StateChanged(ConnectionState::Closed))
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_handshake_schedules_retry() {
    let mut broker = FakeBroker::start(Script {
        reject_connect: true,
        ..Default::default()
    })
    .await;
    let config = ConnectConfig {
        reconnect_delay: Duration::from_millis(50),
        ..broker.config(TransportKind::SockJs)
    };
    let (mut manager, mut events) = ConnectionManager::new(config);
    manager.connect().unwrap();

    let event = next_event(&mut events, |e| matches!(e, Event::HandshakeFailed { .. })).await;
    let Event::HandshakeFailed { reason } = event else {
        unreachable!()
    };
    assert!(reason.contains("bad credentials"), "reason was {reason}");
    next_event(&mut events, |e| matches!(e, Event::Reconnecting { .. })).await;
    assert_eq!(manager.state(), ConnectionState::Pending);

    // The retry reaches the broker again.
    broker.expect_frame(Command::Connect).await;
    broker.expect_frame(Command::Connect).await;

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_handshake_without_retry_fails() {
    let broker = FakeBroker::start(Script {
        reject_connect: true,
        ..Default::default()
    })
    .await;
    let (mut manager, mut events) = ConnectionManager::new(broker.config(TransportKind::WebSocket));
    manager.connect().unwrap();

    next_event(&mut events, |e| {
        matches!(e, Event::StateChanged(ConnectionState::Failed))
    })
    .await;
    assert!(!manager.state().is_active());
    assert!(!manager.disconnect());
}

#[tokio::test]
async fn broker_error_frame_drops_and_reconnects() {
    let mut broker = FakeBroker::start(Script::default()).await;
    let config = ConnectConfig {
        reconnect_delay: Duration::from_millis(50),
        ..broker.config(TransportKind::SockJs)
    };
    let (mut manager, mut events) = connect_and_subscribe(&mut broker, config).await;

    broker.send_error("queue overflow");
    let event = next_event(&mut events, |e| matches!(e, Event::ServerError { .. })).await;
    let Event::ServerError { message } = event else {
        unreachable!()
    };
    assert_eq!(message, "queue overflow");
    next_event(&mut events, |e| matches!(e, Event::Disconnected { .. })).await;
    next_event(&mut events, |e| matches!(e, Event::Reconnecting { .. })).await;

    // Second session comes back up and subscribes again.
    next_event(&mut events, |e| matches!(e, Event::Connected { .. })).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    broker.expect_frame(Command::Subscribe).await;

    manager.disconnect();
}
