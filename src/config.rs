//! Configuration for the netrate host and client.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::size::{payload_size, SizeUnit, MAX_PAYLOAD_SIZE};
use crate::stats::FailedCyclePolicy;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "netrate")]
#[command(author = "netrate authors")]
#[command(version = "0.1.0")]
#[command(about = "Measure TCP payload transfer rate between two endpoints", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve random payloads to a benchmarking client
    Host(HostArgs),
    /// Run a benchmark against a host
    Client(ClientArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct HostArgs {
    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Extra memory, as a percent of the pool size, required by the self-test
    #[arg(long)]
    pub headroom: Option<u32>,

    /// Keep accepting new runs after a pool is drained
    #[arg(long)]
    pub continuous: bool,

    /// Assume this many bytes are available instead of probing the system
    #[arg(long)]
    pub available_memory: Option<u64>,
}

#[derive(clap::Args, Debug, Default)]
pub struct ClientArgs {
    /// Host address to benchmark against
    #[arg(long)]
    pub host: Option<String>,

    /// Host port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Payload unit (b, kib, mib, gib)
    #[arg(short, long)]
    pub unit: Option<String>,

    /// Payload size in units
    #[arg(short, long)]
    pub multiplier: Option<u64>,

    /// Number of fetch cycles
    #[arg(short = 'n', long)]
    pub cycles: Option<u32>,

    /// Connect timeout in milliseconds (default: none)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Read timeout in milliseconds (default: none)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Leave failed cycles out of min/max/average rates
    #[arg(long)]
    pub exclude_failed: bool,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Host listener configuration
#[derive(Debug, Deserialize)]
pub struct HostSection {
    /// Address to bind to
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep serving after a run completes
    #[serde(default)]
    pub continuous: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_port(),
            continuous: false,
        }
    }
}

/// Client run configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Host to connect to
    #[serde(default = "default_client_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: u64,
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    /// Leave failed cycles out of rate statistics
    #[serde(default)]
    pub exclude_failed: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_port(),
            unit: default_unit(),
            multiplier: default_multiplier(),
            cycles: default_cycles(),
            connect_timeout_ms: None,
            read_timeout_ms: None,
            exclude_failed: false,
        }
    }
}

/// Host memory self-test configuration
#[derive(Debug, Deserialize, Default)]
pub struct MemorySection {
    /// Safety margin as a percent of the requested pool size
    #[serde(default)]
    pub headroom_percent: u32,
    /// Fixed available memory in bytes (skips the system probe)
    pub available: Option<u64>,
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

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5005
}

fn default_unit() -> String {
    "mib".to_string()
}

fn default_multiplier() -> u64 {
    100
}

fn default_cycles() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub host: String,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub headroom_percent: u32,
    pub continuous: bool,
    pub available_memory: Option<u64>,
}

/// Resolved and validated client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub unit: SizeUnit,
    pub multiplier: u64,
    pub cycles: u32,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub failed_cycle_policy: FailedCyclePolicy,
}

impl ClientConfig {
    /// Bytes per payload.
    pub fn payload_size(&self) -> u64 {
        // Validated at construction
        payload_size(self.unit, self.multiplier).unwrap_or(u64::MAX)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be positive".to_string()));
        }
        if self.multiplier == 0 {
            return Err(ConfigError::Invalid("multiplier must be positive".to_string()));
        }
        if self.cycles == 0 {
            return Err(ConfigError::Invalid("cycles must be positive".to_string()));
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "connect timeout must be positive (omit it for no timeout)".to_string(),
            ));
        }
        if self.read_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid(
                "read timeout must be positive (omit it for no timeout)".to_string(),
            ));
        }
        match payload_size(self.unit, self.multiplier) {
            Some(size) if size <= MAX_PAYLOAD_SIZE => Ok(()),
            _ => Err(ConfigError::Invalid(format!(
                "payload of {} {} exceeds the 10 GiB limit",
                self.multiplier, self.unit
            ))),
        }
    }
}

/// What the process was asked to do
#[derive(Debug, Clone)]
pub enum Mode {
    Host(HostConfig),
    Client(ClientConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at (CLI takes precedence).
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mode = match cli.command {
            Command::Host(args) => Mode::Host(resolve_host(args, &toml_config)?),
            Command::Client(args) => Mode::Client(resolve_client(args, &toml_config)?),
        };

        Ok(Config {
            mode,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn resolve_host(args: HostArgs, toml_config: &TomlConfig) -> Result<HostConfig, ConfigError> {
    let config = HostConfig {
        host: args.host.unwrap_or_else(|| toml_config.host.host.clone()),
        port: args.port.unwrap_or(toml_config.host.port),
        headroom_percent: args
            .headroom
            .unwrap_or(toml_config.memory.headroom_percent),
        continuous: args.continuous || toml_config.host.continuous,
        available_memory: args.available_memory.or(toml_config.memory.available),
    };

    if config.port == 0 {
        return Err(ConfigError::Invalid("port must be positive".to_string()));
    }
    Ok(config)
}

fn resolve_client(args: ClientArgs, toml_config: &TomlConfig) -> Result<ClientConfig, ConfigError> {
    let section = &toml_config.client;
    let unit_str = args.unit.unwrap_or_else(|| section.unit.clone());
    let unit = unit_str
        .parse::<SizeUnit>()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    let failed_cycle_policy = if args.exclude_failed || section.exclude_failed {
        FailedCyclePolicy::Exclude
    } else {
        FailedCyclePolicy::CountAsZero
    };

    let config = ClientConfig {
        host: args.host.unwrap_or_else(|| section.host.clone()),
        port: args.port.unwrap_or(section.port),
        unit,
        multiplier: args.multiplier.unwrap_or(section.multiplier),
        cycles: args.cycles.unwrap_or(section.cycles),
        connect_timeout: args
            .connect_timeout_ms
            .or(section.connect_timeout_ms)
            .map(Duration::from_millis),
        read_timeout: args
            .read_timeout_ms
            .or(section.read_timeout_ms)
            .map(Duration::from_millis),
        failed_cycle_policy,
    };

    config.validate()?;
    Ok(config)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_args(argv: &[&str]) -> CliArgs {
        let mut full = vec!["netrate"];
        full.extend_from_slice(argv);
        CliArgs::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.host.host, "0.0.0.0");
        assert_eq!(config.host.port, 5005);
        assert_eq!(config.client.unit, "mib");
        assert_eq!(config.client.multiplier, 100);
        assert_eq!(config.client.cycles, 10);
        assert_eq!(config.memory.headroom_percent, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [host]
            host = "192.168.1.234"
            port = 6000
            continuous = true

            [client]
            host = "192.168.1.234"
            unit = "kib"
            multiplier = 512
            cycles = 20
            read_timeout_ms = 5000

            [memory]
            headroom_percent = 15
            available = 1073741824

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host.host, "192.168.1.234");
        assert_eq!(config.host.port, 6000);
        assert!(config.host.continuous);
        assert_eq!(config.client.unit, "kib");
        assert_eq!(config.client.multiplier, 512);
        assert_eq!(config.client.cycles, 20);
        assert_eq!(config.client.read_timeout_ms, Some(5000));
        assert_eq!(config.client.port, 5005);
        assert_eq!(config.memory.headroom_percent, 15);
        assert_eq!(config.memory.available, Some(1 << 30));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_client_defaults() {
        let config = Config::from_args(client_args(&["client"])).unwrap();
        match config.mode {
            Mode::Client(c) => {
                assert_eq!(c.host, "127.0.0.1");
                assert_eq!(c.port, 5005);
                assert_eq!(c.unit, SizeUnit::MiB);
                assert_eq!(c.payload_size(), 100 * 1024 * 1024);
                assert_eq!(c.connect_timeout, None);
                assert_eq!(c.failed_cycle_policy, FailedCyclePolicy::CountAsZero);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_client_cli_overrides() {
        let config = Config::from_args(client_args(&[
            "client", "--host", "10.0.0.2", "-u", "KiB", "-m", "100", "-n", "5",
            "--read-timeout-ms", "250", "--exclude-failed", "--log-level", "debug",
        ]))
        .unwrap();
        match config.mode {
            Mode::Client(c) => {
                assert_eq!(c.host, "10.0.0.2");
                assert_eq!(c.payload_size(), 102_400);
                assert_eq!(c.cycles, 5);
                assert_eq!(c.read_timeout, Some(Duration::from_millis(250)));
                assert_eq!(c.failed_cycle_policy, FailedCyclePolicy::Exclude);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_client_validation() {
        for argv in [
            &["client", "-m", "0"][..],
            &["client", "-n", "0"][..],
            &["client", "-p", "0"][..],
            &["client", "-u", "kb"][..],
            &["client", "-u", "gib", "-m", "11"][..],
            &["client", "--read-timeout-ms", "0"][..],
            &["client", "--connect-timeout-ms", "0"][..],
        ] {
            assert!(
                matches!(Config::from_args(client_args(argv)), Err(ConfigError::Invalid(_))),
                "accepted {:?}",
                argv
            );
        }

        // Exactly 10 GiB is allowed
        assert!(Config::from_args(client_args(&["client", "-u", "gib", "-m", "10"])).is_ok());
        assert!(Config::from_args(client_args(&[
            "client",
            "--read-timeout-ms",
            "1",
            "--connect-timeout-ms",
            "1",
        ]))
        .is_ok());
    }

    #[test]
    fn test_zero_timeout_in_file_rejected() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [client]
            read_timeout_ms = 0
            "#,
        )
        .unwrap();
        let err = resolve_client(ClientArgs::default(), &toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_host_args() {
        let config = Config::from_args(client_args(&[
            "host", "--port", "6000", "--headroom", "20", "--continuous",
        ]))
        .unwrap();
        match config.mode {
            Mode::Host(h) => {
                assert_eq!(h.host, "0.0.0.0");
                assert_eq!(h.port, 6000);
                assert_eq!(h.headroom_percent, 20);
                assert!(h.continuous);
                assert_eq!(h.available_memory, None);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_args(client_args(&[
            "--config",
            "/nonexistent/netrate.toml",
            "client",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
    }
}
