//! Configuration for the measurement server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "rust-ndt-server")]
#[command(version)]
#[command(about = "Network measurement server streaming socket statistics over WebSocket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrently running subtests (0 = unlimited)
    #[arg(short = 'm', long)]
    pub max_concurrent_tests: Option<u64>,

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
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub sockets: SocketsConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AdmissionConfig {
    /// 0 means unlimited
    #[serde(default)]
    pub max_concurrent_tests: u64,
}

/// Descriptor cache tuning
#[derive(Debug, Deserialize)]
pub struct SocketsConfig {
    /// Seconds an unclaimed descriptor is kept
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for SocketsConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResultsConfig {
    /// How many finished subtests `/api/results` keeps
    #[serde(default = "default_results_capacity")]
    pub capacity: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            capacity: default_results_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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
    "0.0.0.0:8080".to_string()
}

fn default_stale_after() -> u64 {
    60
}

fn default_results_capacity() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_concurrent_tests: u64,
    pub stale_after: Duration,
    pub results_capacity: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// CLI values win over file values.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_concurrent_tests: cli
                .max_concurrent_tests
                .unwrap_or(toml_config.admission.max_concurrent_tests),
            stale_after: Duration::from_secs(toml_config.sockets.stale_after_secs),
            results_capacity: toml_config.results.capacity,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}", path = .0.display(), source = .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{path}': {source}", path = .0.display(), source = .1)]
    TomlParse(PathBuf, toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.admission.max_concurrent_tests, 0);
        assert_eq!(config.sockets.stale_after_secs, 60);
        assert_eq!(config.results.capacity, 100);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9090"

            [admission]
            max_concurrent_tests = 8

            [sockets]
            stale_after_secs = 5

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9090");
        assert_eq!(config.admission.max_concurrent_tests, 8);
        assert_eq!(config.sockets.stale_after_secs, 5);
        assert_eq!(config.results.capacity, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs::parse_from(["rust-ndt-server", "-m", "2", "--log-level", "warn"]);
        let file: TomlConfig = toml::from_str("[admission]\nmax_concurrent_tests = 8").unwrap();

        let config = Config::merge(cli, file);
        assert_eq!(config.max_concurrent_tests, 2);
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_error_names_the_file() {
        let path = PathBuf::from("/etc/ndt/server.toml");
        let err = ConfigError::FileRead(
            path.clone(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to read config file '/etc/ndt/server.toml': no such file"
        );

        let parse = toml::from_str::<TomlConfig>("[server\n").unwrap_err();
        let err = ConfigError::TomlParse(path, parse);
        assert!(err
            .to_string()
            .starts_with("Failed to parse config file '/etc/ndt/server.toml': "));
    }
}
