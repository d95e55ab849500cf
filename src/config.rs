//! Configuration for the echogate server
//!
//! Values come from command-line flags (each with an environment variable
//! fallback) and an optional TOML file. Flags and environment take
//! precedence over the file, which takes precedence over built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Command-line arguments
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "echogate")]
#[command(version)]
#[command(about = "Diagnostic HTTP/WebSocket server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ECHOGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short = 'H', long, env = "HTTP_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "HTTP_PORT")]
    pub port: Option<u16>,

    /// Display name included in every report
    #[arg(long, env = "ECHOGATE_NAME")]
    pub name: Option<String>,

    /// Seconds an idle keep-alive connection may wait for its next request
    #[arg(long, env = "TIMEOUT_KEEP_ALIVE")]
    pub timeout_keep_alive: Option<u64>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "HTTP_DEBUG")]
    pub debug: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Display name included in every report
    pub name: Option<String>,

    /// Keep-alive timeout in seconds (default: 5)
    #[serde(default = "default_keep_alive")]
    pub timeout_keep_alive_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: None,
            timeout_keep_alive_secs: default_keep_alive(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub debug: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_keep_alive() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("keep-alive timeout must be at least 1 second")]
    InvalidKeepAlive,
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub keep_alive_timeout: Duration,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: None,
            keep_alive_timeout: Duration::from_secs(default_keep_alive()),
            log_level: LevelFilter::INFO,
        }
    }
}

impl Config {
    /// Load configuration from the process arguments, environment and optional TOML file
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already-parsed arguments
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config {
            Some(ref path) => Self::read_file(path)?,
            None => TomlConfig::default(),
        };

        let keep_alive = cli
            .timeout_keep_alive
            .unwrap_or(file.server.timeout_keep_alive_secs);
        if keep_alive == 0 {
            return Err(ConfigError::InvalidKeepAlive);
        }

        let log_level = if cli.debug || file.logging.debug {
            LevelFilter::DEBUG
        } else {
            let level = cli.log_level.unwrap_or(file.logging.level);
            level
                .parse::<LevelFilter>()
                .map_err(|_| ConfigError::InvalidLogLevel(level))?
        };

        let name = cli
            .name
            .or(file.server.name)
            .filter(|name| !name.is_empty());

        Ok(Config {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            name,
            keep_alive_timeout: Duration::from_secs(keep_alive),
            log_level,
        })
    }

    fn read_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Bind address in `host:port` form
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
