//! Configuration module for select-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddrV4};
use std::path::PathBuf;

/// How much of the receive buffer is echoed back in the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EchoMode {
    /// Echo exactly the bytes that were received.
    #[default]
    Trimmed,
    /// Echo the whole receive buffer, trailing zero bytes included.
    Padded,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "select-server")]
#[command(author = "select-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A select(2) based TCP server that answers one message per connection", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Maximum number of bytes read from a connection
    #[arg(short = 'm', long)]
    pub max_message_size: Option<usize>,

    /// Largest handle value + 1 that can be watched
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Reply echo mode
    #[arg(long, value_enum)]
    pub echo_mode: Option<EchoMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Handle set capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            capacity: default_capacity(),
        }
    }
}

/// Request/reply configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Receive buffer size
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub echo_mode: EchoMode,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            echo_mode: EchoMode::default(),
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

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_backlog() -> i32 {
    100
}

fn default_capacity() -> usize {
    libc::FD_SETSIZE as usize
}

fn default_max_message_size() -> usize {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddrV4,
    pub backlog: i32,
    pub capacity: usize,
    pub max_message_size: usize,
    pub echo_mode: EchoMode,
    pub log_level: String,
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

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddrV4 = listen
            .parse()
            .map_err(|e| ConfigError::InvalidListen(listen.clone(), e))?;

        let config = Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            capacity: cli.capacity.unwrap_or(toml_config.server.capacity),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.protocol.max_message_size),
            echo_mode: cli.echo_mode.unwrap_or(toml_config.protocol.echo_mode),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fd_setsize = libc::FD_SETSIZE as usize;
        if self.capacity == 0 || self.capacity > fd_setsize {
            return Err(ConfigError::Invalid(format!(
                "capacity must be between 1 and {fd_setsize}, got {}",
                self.capacity
            )));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be greater than 0, got {}",
                self.backlog
            )));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String, AddrParseError),
    Invalid(String),
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
            ConfigError::InvalidListen(addr, e) => {
                write!(f, "Invalid IPv4 listen address '{}': {}", addr, e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["select-server"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.backlog, 100);
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.max_message_size, 8000);
        assert_eq!(config.echo_mode, EchoMode::Trimmed);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            backlog = 16
            capacity = 256

            [protocol]
            max_message_size = 512
            echo_mode = "padded"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.capacity, 256);
        assert_eq!(config.protocol.max_message_size, 512);
        assert_eq!(config.protocol.echo_mode, EchoMode::Padded);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            [protocol]
            echo_mode = "padded"
            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["-l", "127.0.0.1:7000", "--echo-mode", "trimmed", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.echo_mode, EchoMode::Trimmed);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_rejects_ipv6_listen() {
        let err = Config::merge(cli(&["-l", "[::1]:8080"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(..)));
    }

    #[test]
    fn test_rejects_capacity_beyond_fd_setsize() {
        let err = Config::merge(cli(&["--capacity", "4096"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::merge(cli(&["--capacity", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_empty_message_size() {
        let err = Config::merge(cli(&["-m", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
