//! Glue between the connection manager, the control pair and a presenter.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::ConnectionManager;
use crate::config::ConnectConfig;
use crate::controls::ControlPair;
use crate::error::ConnectError;
use crate::event::Event;
use crate::payload::PayloadError;

/// Where inbound messages end up. Implemented by the UI.
pub trait Presenter: Send {
    /// Raise a blocking alert with the problem detail, verbatim.
    fn show_alert(&mut self, detail: &str);

    /// General notifications are received and discarded by default.
    fn show_message(&mut self, _message: &Value) {}

    /// A message that failed to decode or validate.
    fn show_rejected(&mut self, _destination: &str, _error: &PayloadError) {}

    /// Connection lifecycle notices (handshake failures, drops, retries).
    fn show_status(&mut self, _text: &str) {}
}

/// Simple callback-based presenter.
pub struct CallbackPresenter<F>
where
    F: FnMut(&str) + Send,
{
    on_alert: F,
}

impl<F> CallbackPresenter<F>
where
    F: FnMut(&str) + Send,
{
    pub fn new(on_alert: F) -> Self {
        Self { on_alert }
    }
}

impl<F> Presenter for CallbackPresenter<F>
where
    F: FnMut(&str) + Send,
{
    fn show_alert(&mut self, detail: &str) {
        (self.on_alert)(detail);
    }
}

/// The connection controller: connect/disconnect plus UI sync and dispatch.
pub struct Controller<P: Presenter> {
    manager: ConnectionManager,
    controls: ControlPair,
    presenter: P,
}

impl<P: Presenter> Controller<P> {
    pub fn new(config: ConnectConfig, presenter: P) -> (Self, mpsc::Receiver<Event>) {
        let (manager, events) = ConnectionManager::new(config);
        let controller = Self {
            manager,
            controls: ControlPair::new(),
            presenter,
        };
        (controller, events)
    }

    /// Start connecting. The controls flip to "connected" right away so the
    /// pending handshake can be cancelled with the disconnect control.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        let result = self.manager.connect();
        self.sync_controls();
        result
    }

    /// Tear down the session, if any. The controls always end "disconnected".
    /// Returns whether a session existed.
    pub fn disconnect(&mut self) -> bool {
        let existed = self.manager.disconnect();
        self.controls.set_connected(false);
        existed
    }

    /// Disconnect and wait (bounded) for the session to close its socket.
    pub async fn shutdown(&mut self) -> bool {
        let existed = self.manager.shutdown().await;
        self.controls.set_connected(false);
        existed
    }

    /// Apply one event from the manager.
    pub fn handle_event(&mut self, event: &Event) {
        match event {
            // The manager's current state is authoritative; the event may be stale.
            Event::StateChanged(_) => self.sync_controls(),
            Event::Connected { version, server } => {
                let server = server.as_deref().unwrap_or("broker");
                let version = version.as_deref().unwrap_or("1.0");
                self.presenter
                    .show_status(&format!("Connected to {server} (STOMP {version})"));
            }
            Event::Alert(details) => self.presenter.show_alert(&details.detail),
            Event::Notification(value) => self.presenter.show_message(value),
            Event::PayloadRejected { destination, error } => {
                self.presenter.show_rejected(destination, error);
            }
            Event::ServerError { message } => {
                self.presenter.show_status(&format!("Broker error: {message}"));
            }
            Event::HandshakeFailed { reason } => {
                self.presenter.show_status(&format!("Handshake failed: {reason}"));
            }
            Event::Disconnected { reason } => {
                self.presenter.show_status(&format!("Connection lost: {reason}"));
            }
            Event::Reconnecting { delay } => {
                self.presenter
                    .show_status(&format!("Retrying in {}s", delay.as_secs_f32()));
            }
        }
    }

    pub fn controls(&self) -> &ControlPair {
        &self.controls
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    fn sync_controls(&mut self) {
        self.controls
            .set_connected(self.manager.state().is_active());
    }
}
