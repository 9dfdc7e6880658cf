//! Events emitted by the connection manager for the UI layer to consume.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::payload::{PayloadError, ProblemDetails};

/// Lifecycle of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session. Initial state, and the state after `disconnect()`.
    #[default]
    Closed,
    /// A handshake is in flight or a retry is scheduled.
    Pending,
    /// CONNECTED received; subscriptions are live.
    Connected,
    /// The handshake failed and retry is disabled.
    Failed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Pending => "pending",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether a session owns the connection (UI shows "connected").
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Pending | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events that the SDK emits to its single consumer (TUI, bot, test, ...).
#[derive(Debug, Clone)]
pub enum Event {
    StateChanged(ConnectionState),

    /// CONNECTED received.
    Connected {
        version: Option<String>,
        server: Option<String>,
    },

    /// Validated problem details from the error topic.
    Alert(ProblemDetails),

    /// A decoded message from the general topic.
    Notification(Value),

    /// A message whose body failed to decode or validate.
    PayloadRejected {
        destination: String,
        error: PayloadError,
    },

    /// The broker sent a STOMP ERROR frame.
    ServerError {
        message: String,
    },

    /// Transport open or CONNECTED exchange failed.
    HandshakeFailed {
        reason: String,
    },

    /// An established session ended without being asked to.
    Disconnected {
        reason: String,
    },

    /// A new attempt starts after `delay`.
    Reconnecting {
        delay: Duration,
    },
}
