//! Persistent configuration for mimp-tui.
//!
//! Config file lives at `~/.config/mimp/console.toml`. Every field is
//! optional; anything missing falls back to the SDK defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use mimp_sdk::config::{
    DEFAULT_BASE_URL, DEFAULT_ENDPOINT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INCOMING,
    DEFAULT_HEARTBEAT_OUTGOING, DEFAULT_RECONNECT_DELAY, ERROR_TOPIC, NOTIFICATION_TOPIC,
};
use mimp_sdk::{ConnectConfig, Heartbeat, TransportKind};

/// User configuration (persisted in console.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Web server base URL. Default: http://localhost:8181
    pub url: Option<String>,
    /// Broker endpoint path. Default: /mimp-ws
    pub endpoint: Option<String>,
    /// `sockjs` or `websocket`.
    pub transport: Option<String>,
    /// Outgoing heart-beat in milliseconds (0 disables).
    pub heartbeat_outgoing_ms: Option<u64>,
    /// Incoming heart-beat in milliseconds (0 disables).
    pub heartbeat_incoming_ms: Option<u64>,
    /// Retry delay in milliseconds (0 disables retry).
    pub reconnect_delay_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub error_topic: Option<String>,
    pub notification_topic: Option<String>,
    /// Where tracing output goes.
    pub log_file: Option<PathBuf>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimp")
}

pub fn config_path() -> PathBuf {
    config_dir().join("console.toml")
}

/// Default log location when neither CLI nor config names one.
pub fn default_log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mimp")
        .join("console.log")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Read `path`, warning on stderr and falling back to defaults when it
    /// is missing or unreadable. Runs before the terminal is taken over.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => eprintln!("Warning: bad config file {}: {e}", path.display()),
                },
                Err(e) => eprintln!("Warning: can't read {}: {e}", path.display()),
            }
        }
        Self::default()
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub connect: ConnectConfig,
    pub log_file: PathBuf,
    /// Connect as soon as the console starts.
    pub auto_connect: bool,
}

impl Resolved {
    pub fn merge(cli: &crate::Cli, config: &Config) -> Result<Self> {
        let base_url = cli
            .url
            .clone()
            .or_else(|| config.url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let endpoint = cli
            .endpoint
            .clone()
            .or_else(|| config.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let transport = match cli.transport.as_deref().or(config.transport.as_deref()) {
            Some(name) => match TransportKind::parse(name) {
                Some(kind) => kind,
                None => bail!("unknown transport {name:?} (expected sockjs or websocket)"),
            },
            None => TransportKind::default(),
        };

        let millis = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map(Duration::from_millis).unwrap_or(default)
        };
        let heartbeat = Heartbeat {
            outgoing: millis(
                cli.heartbeat_ms,
                config.heartbeat_outgoing_ms,
                DEFAULT_HEARTBEAT_OUTGOING,
            ),
            incoming: millis(None, config.heartbeat_incoming_ms, DEFAULT_HEARTBEAT_INCOMING),
        };
        let reconnect_delay = millis(
            cli.reconnect_delay_ms,
            config.reconnect_delay_ms,
            DEFAULT_RECONNECT_DELAY,
        );
        let handshake_timeout = millis(
            None,
            config.handshake_timeout_ms,
            DEFAULT_HANDSHAKE_TIMEOUT,
        );

        let connect = ConnectConfig {
            base_url,
            endpoint,
            transport,
            heartbeat,
            reconnect_delay,
            handshake_timeout,
            error_topic: config
                .error_topic
                .clone()
                .unwrap_or_else(|| ERROR_TOPIC.to_string()),
            notification_topic: config
                .notification_topic
                .clone()
                .unwrap_or_else(|| NOTIFICATION_TOPIC.to_string()),
        };
        // Fail early instead of on the first connect attempt.
        connect.endpoint_url()?;

        let log_file = cli
            .log_file
            .clone()
            .or_else(|| config.log_file.clone())
            .unwrap_or_else(default_log_path);

        Ok(Self {
            connect,
            log_file,
            auto_connect: cli.connect,
        })
    }

    /// The config file equivalent of these settings, for `--save-config`.
    pub fn to_config(&self) -> Config {
        let ms = |d: Duration| Some(d.as_millis() as u64);
        Config {
            url: Some(self.connect.base_url.clone()),
            endpoint: Some(self.connect.endpoint.clone()),
            transport: Some(self.connect.transport.label().to_string()),
            heartbeat_outgoing_ms: ms(self.connect.heartbeat.outgoing),
            heartbeat_incoming_ms: ms(self.connect.heartbeat.incoming),
            reconnect_delay_ms: ms(self.connect.reconnect_delay),
            handshake_timeout_ms: ms(self.connect.handshake_timeout),
            error_topic: Some(self.connect.error_topic.clone()),
            notification_topic: Some(self.connect.notification_topic.clone()),
            log_file: Some(self.log_file.clone()),
        }
    }
}
