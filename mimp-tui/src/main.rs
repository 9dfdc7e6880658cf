//! mimp-tui: terminal console for the MIMP message broker.

mod app;
mod config;
mod ui;

use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{Event as TermEvent, EventStream};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::{Config, Resolved};

/// Redraw interval for the status bar clock.
const TICK: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "mimp-tui", about = "Terminal console for the MIMP message broker")]
pub struct Cli {
    /// Web server base URL (default http://localhost:8181).
    #[arg(long, env = "MIMP_URL")]
    pub url: Option<String>,
    /// Broker endpoint path (default /mimp-ws).
    #[arg(long, env = "MIMP_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Transport: sockjs or websocket.
    #[arg(long, env = "MIMP_TRANSPORT")]
    pub transport: Option<String>,
    /// Retry delay in milliseconds; 0 disables retry.
    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,
    /// Outgoing heart-beat in milliseconds; 0 disables.
    #[arg(long)]
    pub heartbeat_ms: Option<u64>,
    /// Log file (default in the user cache directory).
    #[arg(long, env = "MIMP_LOG_FILE")]
    pub log_file: Option<PathBuf>,
    /// Alternate config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Connect immediately on start.
    #[arg(long)]
    pub connect: bool,
    /// Write the effective settings to the config file and exit.
    #[arg(long)]
    pub save_config: bool,
}

fn init_logging(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    // JSON logs for collection (MIMP_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("MIMP_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("mimp_sdk=info".parse()?)
        .add_directive("mimp_tui=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file));
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

type Term = ratatui::Terminal<CrosstermBackend<Stdout>>;

/// Raw mode + alternate screen, restored on drop.
struct TerminalGuard {
    terminal: Term,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = ratatui::Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { terminal })
    }

    fn restore() -> Result<()> {
        disable_raw_mode()?;
        execute!(io::stdout(), LeaveAlternateScreen)?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = Self::restore() {
            tracing::error!("Failed to restore terminal: {e}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let resolved = Resolved::merge(&cli, &file_config)?;

    if cli.save_config {
        let path = cli.config.clone().unwrap_or_else(config::config_path);
        resolved.to_config().save_to(&path)?;
        eprintln!("Saved settings to {}", path.display());
        return Ok(());
    }

    init_logging(&resolved.log_file)?;
    tracing::info!(
        "Starting console for {}{} ({})",
        resolved.connect.base_url,
        resolved.connect.endpoint,
        resolved.connect.transport.label()
    );

    let mut guard = TerminalGuard::new()?;
    let result = run(&mut guard.terminal, resolved).await;
    drop(guard);
    result
}

async fn run(terminal: &mut Term, resolved: Resolved) -> Result<()> {
    let (mut app, mut events) = App::new(resolved.connect);
    if resolved.auto_connect {
        app.connect();
    }

    let mut input = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        terminal.draw(|f| ui::draw(f, &app))?;

        tokio::select! {
            term_event = input.next() => match term_event {
                Some(Ok(TermEvent::Key(key))) => app.handle_key(key),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("Terminal input error: {e}");
                    break;
                }
                None => break,
            },
            event = events.recv() => match event {
                Some(event) => app.handle_event(event),
                None => break,
            },
            _ = tick.tick() => {}
        }

        if app.should_quit {
            break;
        }
    }

    app.shutdown().await;
    tracing::info!("Console closed");
    Ok(())
}
