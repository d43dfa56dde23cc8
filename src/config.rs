//! Configuration module for the floodgate server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "floodgate")]
#[command(author = "floodgate authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo-probe server with a hard connection cap", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IP address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (0 picks an ephemeral port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrently admitted connections
    #[arg(short = 'n', long)]
    pub connection_limit: Option<NonZeroUsize>,

    /// Maximum size of a single unterminated probe frame in bytes
    #[arg(long)]
    pub max_probe_size: Option<usize>,

    /// Seconds to wait for admitted connections to finish during shutdown
    #[arg(long)]
    pub drain_timeout: Option<u64>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog passed to `listen(2)`
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            workers: None,
        }
    }
}

/// Admission and draining limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrently admitted connections
    #[serde(default = "default_connection_limit")]
    pub connection_limit: NonZeroUsize,
    /// Maximum size of a buffered probe frame
    #[serde(default = "default_max_probe_size")]
    pub max_probe_size: usize,
    /// Seconds to wait for admitted connections during shutdown
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connection_limit: default_connection_limit(),
            max_probe_size: default_max_probe_size(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8444
}

fn default_backlog() -> u32 {
    1024
}

fn default_connection_limit() -> NonZeroUsize {
    NonZeroUsize::new(25).unwrap_or(NonZeroUsize::MIN)
}

fn default_max_probe_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub connection_limit: NonZeroUsize,
    pub max_probe_size: usize,
    pub drain_timeout: Duration,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(Some(cli), toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: Option<CliArgs>, toml_config: TomlConfig) -> Self {
        let Some(cli) = cli else {
            return Config {
                host: toml_config.server.host,
                port: toml_config.server.port,
                backlog: toml_config.server.backlog,
                connection_limit: toml_config.limits.connection_limit,
                max_probe_size: toml_config.limits.max_probe_size,
                drain_timeout: Duration::from_secs(toml_config.limits.drain_timeout_secs),
                workers: toml_config.server.workers,
                log_level: toml_config.logging.level,
            };
        };

        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            connection_limit: cli
                .connection_limit
                .unwrap_or(toml_config.limits.connection_limit),
            max_probe_size: cli
                .max_probe_size
                .unwrap_or(toml_config.limits.max_probe_size),
            drain_timeout: Duration::from_secs(
                cli.drain_timeout
                    .unwrap_or(toml_config.limits.drain_timeout_secs),
            ),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Reject values that would leave the server unable to serve probes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_probe_size == 0 {
            return Err(ConfigError::Invalid("max_probe_size must be > 0"));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be > 0"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be > 0"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
