use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::state::{ChatSettings, DEFAULT_HISTORY_LIMIT, DEFAULT_NOTIFY_TIMEOUT};

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    /// Served under /uploads (voice notes in uploads/voices, profile photos at the root)
    pub upload_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub history_limit: usize,
    pub notify_timeout_secs: u64,
}

// Unset flags are skipped when serialized and never mask TOML or env values.
/// Duet direct-message chat server
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "duet-server", version, about = "Duet direct-message chat server")]
pub struct Cli {
    /// Port to listen on [default: 3001]
    #[arg(long, env = "DUET_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "DUET_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./duet.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys) [default: ./data]
    #[arg(long, env = "DUET_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Directory served under /uploads [default: ./uploads]
    #[arg(long, env = "DUET_UPLOAD_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<String>,

    /// Public base URL used for absolute voice and photo URLs
    #[arg(long, env = "DUET_BASE_URL")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Number of messages sent in the history snapshot on join [default: 50]
    #[arg(long, env = "DUET_HISTORY_LIMIT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Timeout in seconds for background presence and new-message notifications [default: 5]
    #[arg(long, env = "DUET_NOTIFY_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            bind_address: "0.0.0.0".to_string(),
            config: "./duet.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            upload_dir: "./uploads".to_string(),
            base_url: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            notify_timeout_secs: DEFAULT_NOTIFY_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DUET_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Cli::parse())
    }

    /// Same layering as `load`, from already parsed flags.
    pub fn load_from(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DUET_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            base_url: self
                .base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            history_limit: self.history_limit,
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
            upload_dir: PathBuf::from(&self.upload_dir),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Duet Chat Server Configuration
# Place this file at ./duet.toml or specify with --config <path>
# All settings can be overridden via environment variables (DUET_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3001)
# port = 3001

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# Directory served under /uploads; voice notes are read from <upload_dir>/voices
# and profile photos are written to <upload_dir> itself
# upload_dir = "./uploads"

# Public base URL for absolute voice and photo URLs. When unset, the Host header of the
# WebSocket upgrade request is used instead.
# base_url = "https://chat.example.com"

# Messages sent in the history snapshot when a client joins a room
# history_limit = 50

# Upper bound in seconds for background presence / new-message notifications
# notify_timeout_secs = 5
"#
    .to_string()
}
