//! Application state for the TUI.

use std::collections::VecDeque;
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use serde_json::Value;
use tokio::sync::mpsc;

use mimp_sdk::{ConnectConfig, ConnectionState, Controller, Event, PayloadError, Presenter};

/// Maximum number of lines to keep in the log.
const MAX_LOG_LINES: usize = 1000;
/// Maximum number of alerts waiting for acknowledgement.
const MAX_PENDING_ALERTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Notice,
    Alert,
    Error,
}

/// A single line in the console log.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: String,
    pub kind: LineKind,
    pub text: String,
}

/// What the user sees: the log plus pending alerts.
#[derive(Debug, Default)]
pub struct Screen {
    pub log: VecDeque<LogLine>,
    /// Alerts waiting for acknowledgement, oldest first. The front one is shown.
    pub alerts: VecDeque<String>,
}

impl Screen {
    pub fn push(&mut self, kind: LineKind, text: &str) {
        self.log.push_back(LogLine {
            timestamp: now_str(),
            kind,
            text: sanitize_text(text),
        });
        if self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
    }

    pub fn current_alert(&self) -> Option<&str> {
        self.alerts.front().map(String::as_str)
    }

    pub fn dismiss_alert(&mut self) -> bool {
        self.alerts.pop_front().is_some()
    }
}

impl Presenter for Screen {
    fn show_alert(&mut self, detail: &str) {
        self.push(LineKind::Alert, detail);
        if self.alerts.len() >= MAX_PENDING_ALERTS {
            // Keep the alert on screen; drop the oldest one queued behind it.
            if let Some(dropped) = self.alerts.remove(1) {
                tracing::warn!("Alert queue full, dropped: {dropped}");
                self.push(
                    LineKind::Error,
                    "Too many pending alerts; the oldest unread one was dropped (still in the log).",
                );
            }
        }
        self.alerts.push_back(detail.to_string());
    }

    fn show_message(&mut self, message: &Value) {
        self.push(LineKind::Notice, &message.to_string());
    }

    fn show_rejected(&mut self, destination: &str, error: &PayloadError) {
        self.push(
            LineKind::Error,
            &format!("Ignored message on {destination}: {error}"),
        );
    }

    fn show_status(&mut self, text: &str) {
        self.push(LineKind::Info, text);
    }
}

/// Which control has keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Connect,
    Disconnect,
}

impl Focus {
    fn toggle(self) -> Self {
        match self {
            Focus::Connect => Focus::Disconnect,
            Focus::Disconnect => Focus::Connect,
        }
    }
}

/// Top-level application state.
pub struct App {
    pub controller: Controller<Screen>,
    pub focus: Focus,
    /// Server we connect to, for the status bar.
    pub server_url: String,
    /// When the current session reached Connected.
    pub connected_at: Option<Instant>,
    pub should_quit: bool,
}

impl App {
    pub fn new(config: ConnectConfig) -> (Self, mpsc::Receiver<Event>) {
        let server_url = format!("{}{}", config.base_url, config.endpoint);
        let (controller, events) = Controller::new(config, Screen::default());
        let mut app = Self {
            controller,
            focus: Focus::Connect,
            server_url,
            connected_at: None,
            should_quit: false,
        };
        app.screen_mut()
            .push(LineKind::Info, "Press c to connect, d to disconnect, q to quit.");
        (app, events)
    }

    pub fn screen(&self) -> &Screen {
        self.controller.presenter()
    }

    fn screen_mut(&mut self) -> &mut Screen {
        self.controller.presenter_mut()
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.manager().state()
    }

    pub fn connect(&mut self) {
        match self.controller.connect() {
            Ok(()) => {
                let line = format!("Connecting to {}", self.server_url);
                self.screen_mut().push(LineKind::Info, &line);
            }
            Err(e) => self.screen_mut().push(LineKind::Error, &format!("Connect: {e}")),
        }
    }

    pub fn disconnect(&mut self) {
        self.controller.disconnect();
        self.connected_at = None;
        self.screen_mut().push(LineKind::Info, "Disconnected");
    }

    /// Close any live session before exit, waiting for the socket to close.
    pub async fn shutdown(&mut self) {
        if self.controller.shutdown().await {
            self.screen_mut().push(LineKind::Info, "Disconnected");
        }
        self.connected_at = None;
    }

    pub fn handle_event(&mut self, event: Event) {
        self.controller.handle_event(&event);
        if let Event::StateChanged(_) = event {
            // Read back the live state; a queued event may be stale.
            match self.state() {
                ConnectionState::Connected => {
                    self.connected_at.get_or_insert_with(Instant::now);
                }
                ConnectionState::Failed => {
                    self.connected_at = None;
                    self.screen_mut()
                        .push(LineKind::Error, "Connection failed; press c to retry.");
                }
                _ => self.connected_at = None,
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        // An open alert blocks everything until acknowledged.
        if self.screen().current_alert().is_some() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                self.screen_mut().dismiss_alert();
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('c') => self.activate(Focus::Connect),
            KeyCode::Char('d') => self.activate(Focus::Disconnect),
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Left | KeyCode::Right => {
                self.focus = self.focus.toggle();
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.activate(self.focus),
            _ => {}
        }
    }

    /// Press a control. Disabled controls ignore the press.
    fn activate(&mut self, target: Focus) {
        let controls = self.controller.controls();
        let control = match target {
            Focus::Connect => controls.connect(),
            Focus::Disconnect => controls.disconnect(),
        };
        if !control.is_enabled() {
            return;
        }
        self.focus = target;
        match target {
            Focus::Connect => self.connect(),
            Focus::Disconnect => self.disconnect(),
        }
    }
}

fn now_str() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Strip terminal control characters (ESC sequences, C0/C1 controls) so
/// broker-supplied text can't drive the terminal.
pub fn sanitize_text(s: &str) -> String {
    s.chars()
        .filter(|&c| c == '\t' || (c >= ' ' && c != '\x7f' && !('\u{80}'..='\u{9f}').contains(&c)))
        .collect()
}
