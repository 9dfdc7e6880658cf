//! WebSocket transport, optionally framed as SockJS.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{ConnectConfig, TransportKind};
use crate::error::ConnectError;
use crate::sockjs::{self, SockJsFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What one read from the transport produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// STOMP text payloads (possibly none, e.g. a repeated SockJS open).
    Payloads(Vec<String>),
    /// Transport-level heartbeat. Counts as inbound activity only.
    Heartbeat,
    /// The peer closed the transport.
    Closed { code: u16, reason: String },
}

/// An open transport ready to carry STOMP frames.
pub struct Transport {
    ws: WsStream,
    kind: TransportKind,
    url: Url,
}

impl Transport {
    /// Open the transport. For SockJS this waits for the `o` frame.
    pub async fn open(config: &ConnectConfig) -> Result<Self, ConnectError> {
        let endpoint = config.endpoint_url()?;
        let url = match config.transport {
            TransportKind::SockJs => {
                let mut rng = rand::thread_rng();
                sockjs::session_url(&endpoint, &mut rng)
            }
            TransportKind::WebSocket => endpoint,
        };

        if url.scheme() == "wss" {
            install_crypto_provider();
        }

        tracing::debug!("Opening {} transport to {url}", config.transport.label());
        let (ws, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!("WebSocket upgraded (status: {})", response.status());

        let mut transport = Transport {
            ws,
            kind: config.transport,
            url,
        };
        if transport.kind == TransportKind::SockJs {
            transport.await_open().await?;
        }
        Ok(transport)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn await_open(&mut self) -> Result<(), ConnectError> {
        loop {
            match self.recv_raw().await? {
                RawText::Text(text) => {
                    return match sockjs::decode(&text)? {
                        SockJsFrame::Open => Ok(()),
                        SockJsFrame::Close { code, reason } => {
                            Err(ConnectError::ClosedDuringHandshake { code, reason })
                        }
                        other => Err(ConnectError::Transport(format!(
                            "expected SockJS open frame, got {other:?}"
                        ))),
                    };
                }
                RawText::Closed { code, reason } => {
                    return Err(ConnectError::ClosedDuringHandshake { code, reason });
                }
            }
        }
    }

    /// Send one STOMP payload.
    pub async fn send(&mut self, payload: &str) -> Result<(), ConnectError> {
        let text = match self.kind {
            TransportKind::SockJs => sockjs::encode(payload),
            TransportKind::WebSocket => payload.to_string(),
        };
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Read the next unit of inbound data. Cancel-safe.
    pub async fn recv(&mut self) -> Result<Received, ConnectError> {
        match self.recv_raw().await? {
            RawText::Closed { code, reason } => Ok(Received::Closed { code, reason }),
            RawText::Text(text) => match self.kind {
                TransportKind::WebSocket => Ok(Received::Payloads(vec![text])),
                TransportKind::SockJs => match sockjs::decode(&text)? {
                    SockJsFrame::Messages(messages) => Ok(Received::Payloads(messages)),
                    SockJsFrame::Heartbeat => Ok(Received::Heartbeat),
                    SockJsFrame::Open => Ok(Received::Payloads(Vec::new())),
                    SockJsFrame::Close { code, reason } => Ok(Received::Closed { code, reason }),
                },
            },
        }
    }

    /// Close the WebSocket. Errors are ignored; the peer may already be gone.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!("WebSocket close failed: {e}");
        }
    }

    async fn recv_raw(&mut self) -> Result<RawText, ConnectError> {
        loop {
            let Some(msg) = self.ws.next().await else {
                return Ok(RawText::Closed {
                    code: 1006,
                    reason: "stream ended".to_string(),
                });
            };
            match msg? {
                Message::Text(text) => return Ok(RawText::Text(text.as_str().to_string())),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(RawText::Text(text)),
                    Err(_) => tracing::warn!("Ignoring non-UTF-8 binary message"),
                },
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Ok(RawText::Closed { code, reason });
                }
                // Ping/pong are answered by tungstenite.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

enum RawText {
    Text(String),
    Closed { code: u16, reason: String },
}

fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
