//! Connection configuration and the console's fixed defaults.

use std::time::Duration;

use url::Url;

use crate::error::ConnectError;
use crate::stomp::Heartbeat;

/// MIMP web server listens here unless told otherwise.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8181";
/// Path of the SockJS/STOMP endpoint.
pub const DEFAULT_ENDPOINT: &str = "/mimp-ws";
/// Error notifications (RFC 7807 problem details).
pub const ERROR_TOPIC: &str = "/topic/error";
/// General notifications.
pub const NOTIFICATION_TOPIC: &str = "/topic/mimp";

pub const DEFAULT_HEARTBEAT_OUTGOING: Duration = Duration::from_millis(30_000);
pub const DEFAULT_HEARTBEAT_INCOMING: Duration = Duration::ZERO;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which transport carries the STOMP frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// SockJS WebSocket transport (`<endpoint>/<server>/<session>/websocket`).
    #[default]
    SockJs,
    /// STOMP text frames sent directly over a WebSocket at `<endpoint>`.
    WebSocket,
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::SockJs => "sockjs",
            TransportKind::WebSocket => "websocket",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sockjs" => Some(TransportKind::SockJs),
            "websocket" | "ws" => Some(TransportKind::WebSocket),
            _ => None,
        }
    }
}

/// Configuration for connecting to the broker.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Base URL of the web server (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    /// Endpoint path appended to `base_url`.
    pub endpoint: String,
    pub transport: TransportKind,
    /// Heart-beat intervals we ask for in CONNECT.
    pub heartbeat: Heartbeat,
    /// Delay before retrying after a failed handshake or a dropped session.
    /// Zero disables retry.
    pub reconnect_delay: Duration,
    /// Upper bound on transport open + CONNECTED.
    pub handshake_timeout: Duration,
    pub error_topic: String,
    pub notification_topic: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            transport: TransportKind::default(),
            heartbeat: Heartbeat {
                outgoing: DEFAULT_HEARTBEAT_OUTGOING,
                incoming: DEFAULT_HEARTBEAT_INCOMING,
            },
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            error_topic: ERROR_TOPIC.to_string(),
            notification_topic: NOTIFICATION_TOPIC.to_string(),
        }
    }
}

impl ConnectConfig {
    /// WebSocket URL of the endpoint, with `http(s)` mapped to `ws(s)`.
    pub fn endpoint_url(&self) -> Result<Url, ConnectError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ConnectError::InvalidUrl(format!("{}: {e}", self.base_url)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConnectError::InvalidUrl(format!(
                    "unsupported scheme {other:?} in {}",
                    self.base_url
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConnectError::InvalidUrl(self.base_url.clone()))?;

        let base_path = url.path().trim_end_matches('/').to_string();
        let endpoint = self.endpoint.trim_start_matches('/');
        url.set_path(&format!("{base_path}/{endpoint}"));
        Ok(url)
    }

    /// Value for the STOMP `host` header.
    pub fn stomp_host(&self) -> String {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Whether retry after failure is enabled.
    pub fn reconnects(&self) -> bool {
        !self.reconnect_delay.is_zero()
    }
}
