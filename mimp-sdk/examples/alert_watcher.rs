//! Headless alert watcher: connects to the broker and prints every alert.
//!
//! Usage:
//!   cargo run --example alert_watcher -- --url http://localhost:8181 --transport sockjs

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mimp_sdk::{
    ConnectConfig, Controller, Event, PayloadError, Presenter, TransportKind,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "alert-watcher", about = "Print MIMP console alerts to stdout")]
struct Args {
    #[arg(long, default_value = "http://localhost:8181")]
    url: String,
    #[arg(long, default_value = "/mimp-ws")]
    endpoint: String,
    /// `sockjs` or `websocket`
    #[arg(long, default_value = "sockjs")]
    transport: String,
    /// Also print notifications from the general topic.
    #[arg(long)]
    verbose: bool,
}

struct Stdout {
    verbose: bool,
}

impl Presenter for Stdout {
    fn show_alert(&mut self, detail: &str) {
        println!("ALERT  {detail}");
    }

    fn show_message(&mut self, message: &Value) {
        if self.verbose {
            println!("NOTICE {message}");
        }
    }

    fn show_rejected(&mut self, destination: &str, error: &PayloadError) {
        eprintln!("rejected message on {destination}: {error}");
    }

    fn show_status(&mut self, text: &str) {
        eprintln!("-- {text}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let transport = TransportKind::parse(&args.transport)
        .ok_or_else(|| anyhow::anyhow!("unknown transport {:?}", args.transport))?;
    let config = ConnectConfig {
        base_url: args.url,
        endpoint: args.endpoint,
        transport,
        reconnect_delay: Duration::from_secs(5),
        ..Default::default()
    };

    let presenter = Stdout {
        verbose: args.verbose,
    };
    let (mut controller, mut events) = Controller::new(config, presenter);
    controller.connect()?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                controller.handle_event(&event);
                if let Event::StateChanged(state) = event {
                    tracing::debug!("state: {state}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.disconnect();
                // Give the session a moment to send DISCONNECT.
                tokio::time::sleep(Duration::from_millis(200)).await;
                break;
            }
        }
    }
    Ok(())
}
