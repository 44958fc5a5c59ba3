//! Server configuration
//!
//! Built from defaults, an optional TOML file and the command line, in that
//! order of precedence (later wins).

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::connection::DEFAULT_MAILBOX_CAPACITY;
use crate::error::ConfigError;
use crate::handler::ConnectionSettings;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 33000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 2;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60;
pub const DEFAULT_MAX_ACCEPT_FAILURES: u32 = 5;

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "line_relay")]
#[command(about = "Line-based multi-room TCP chat relay", long_about = None)]
pub struct Args {
    /// Port to listen on [default: 33000]
    pub port: Option<u16>,

    /// Maximum number of connections served at once [default: 2]
    pub max_connections: Option<usize>,

    /// Host address to bind to [default: 0.0.0.0]
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Pending outbound lines per connection
    pub mailbox_capacity: usize,
    /// Longest accepted input line in bytes
    pub max_line_length: usize,
    /// How long in-flight connections get to drain on shutdown
    pub shutdown_grace_secs: u64,
    /// Consecutive accept failures that shut the server down
    pub max_accept_failures: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            max_accept_failures: DEFAULT_MAX_ACCEPT_FAILURES,
        }
    }
}

impl Config {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the effective configuration for the given arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(host) = &args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(max_connections) = args.max_connections {
            config.max_connections = max_connections;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_connections", self.max_connections),
            ("mailbox_capacity", self.mailbox_capacity),
            ("max_line_length", self.max_line_length),
            ("max_accept_failures", self.max_accept_failures as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1",
                });
            }
        }
        Ok(())
    }

    /// Concurrent task budget: a reader and a writer per connection
    pub fn worker_pool_size(&self) -> usize {
        self.max_connections.saturating_mul(2)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            mailbox_capacity: self.mailbox_capacity,
            max_line_length: self.max_line_length,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
