//! Client SDK for the MIMP console broker.
//!
//! Speaks STOMP 1.2 over a SockJS (or plain WebSocket) transport, subscribes
//! to the error and notification topics, and exposes the connect/disconnect
//! control pair the console renders.
//!
//! ```no_run
//! use mimp_sdk::{ConnectConfig, Controller, CallbackPresenter};
//!
//! # async fn run() -> Result<(), mimp_sdk::ConnectError> {
//! let presenter = CallbackPresenter::new(|detail: &str| eprintln!("ALERT: {detail}"));
//! let (mut controller, mut events) = Controller::new(ConnectConfig::default(), presenter);
//! controller.connect()?;
//! while let Some(event) = events.recv().await {
//!     controller.handle_event(&event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod controls;
pub mod error;
pub mod event;
pub mod payload;
pub mod sockjs;
pub mod stomp;
pub mod transport;

pub use client::ConnectionManager;
pub use config::{ConnectConfig, TransportKind};
pub use controller::{CallbackPresenter, Controller, Presenter};
pub use controls::{Control, ControlPair};
pub use error::ConnectError;
pub use event::{ConnectionState, Event};
pub use payload::{PayloadError, ProblemDetails};
pub use stomp::Heartbeat;
