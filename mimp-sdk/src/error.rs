//! Errors raised while establishing or running a broker session.

use crate::event::ConnectionState;
use crate::sockjs::SockJsError;
use crate::stomp::StompError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("a session is already {0}")]
    AlreadyActive(ConnectionState),
    #[error("invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("broker rejected the connection: {0}")]
    Rejected(String),
    #[error("transport closed during handshake ({code}: {reason})")]
    ClosedDuringHandshake { code: u16, reason: String },
    #[error(transparent)]
    Stomp(#[from] StompError),
    #[error(transparent)]
    SockJs(#[from] SockJsError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectError::Transport(e.to_string())
    }
}
