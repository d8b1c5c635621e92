use crate::buffer::BatchConfig;
use crate::segment::SegmentConfig;
use crate::sender::ClientConfig;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const CONFIG_ENV: &str = "RASK_AGENT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct AgentConfig {
    /// Application id attached to every replay segment
    #[arg(long, env = "APPLICATION_ID", default_value = "rask-app")]
    pub application_id: String,

    /// Collector endpoint for log batches
    #[arg(long, env = "LOGS_ENDPOINT")]
    pub logs_endpoint: Option<String>,

    /// Collector endpoint for RUM event batches
    #[arg(long, env = "RUM_ENDPOINT")]
    pub rum_endpoint: Option<String>,

    /// Collector endpoint for session replay segments
    #[arg(long, env = "REPLAY_ENDPOINT")]
    pub replay_endpoint: Option<String>,

    /// Secondary endpoint receiving a copy of every log batch
    #[arg(long, env = "REPLICA_LOGS_ENDPOINT")]
    pub replica_logs_endpoint: Option<String>,

    /// Secondary endpoint receiving a copy of every RUM batch
    #[arg(long, env = "REPLICA_RUM_ENDPOINT")]
    pub replica_rum_endpoint: Option<String>,

    /// Maximum serialized size of one batch in bytes
    #[arg(long, env = "BATCH_BYTES_LIMIT", default_value = "16384")]
    pub batch_bytes_limit: usize,

    /// Maximum number of messages per batch
    #[arg(long, env = "MAX_BATCH_SIZE", default_value = "50")]
    pub max_batch_size: usize,

    /// Messages larger than this are dropped
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "262144")]
    pub max_message_size: usize,

    /// Batch flush timeout in milliseconds
    #[arg(long, env = "FLUSH_TIMEOUT_MS", default_value = "30000")]
    pub flush_timeout_ms: u64,

    /// Compressed replay segment size limit in bytes
    #[arg(long, env = "MAX_SEGMENT_SIZE", default_value = "6291456")]
    pub max_segment_size: usize,

    /// Replay segment duration limit in milliseconds
    #[arg(long, env = "MAX_SEGMENT_DURATION_MS", default_value = "30000")]
    pub max_segment_duration_ms: u64,

    /// Payloads up to this size use the beacon path while the page goes away
    #[arg(long, env = "BEACON_BYTES_LIMIT", default_value = "60000")]
    pub beacon_bytes_limit: usize,

    /// Gzip log and RUM batches
    #[arg(long, env = "COMPRESS_BATCHES")]
    pub compress_batches: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds
    #[arg(long, env = "CONNECTION_TIMEOUT_SECS", default_value = "10")]
    pub connection_timeout_secs: u64,

    /// Maximum idle HTTP connections per host
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: usize,

    /// Time allowed for in-flight beacons after unload, in milliseconds
    #[arg(long, env = "UNLOAD_GRACE_MS", default_value = "2000")]
    pub unload_grace_ms: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub max_segment_duration: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connection_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub unload_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            application_id: "rask-app".to_string(),
            logs_endpoint: None,
            rum_endpoint: None,
            replay_endpoint: None,
            replica_logs_endpoint: None,
            replica_rum_endpoint: None,
            batch_bytes_limit: 16 * 1024,
            max_batch_size: 50,
            max_message_size: 256 * 1024,
            flush_timeout_ms: 30_000,
            max_segment_size: 6 * 1024 * 1024,
            max_segment_duration_ms: 30_000,
            beacon_bytes_limit: 60_000,
            compress_batches: false,
            request_timeout_secs: 30,
            connection_timeout_secs: 10,
            max_connections: 10,
            unload_grace_ms: 2_000,
            log_level: LogLevel::Info,
            config_file: None,
            flush_timeout: Duration::from_millis(30_000),
            max_segment_duration: Duration::from_millis(30_000),
            request_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            unload_grace: Duration::from_millis(2_000),
        }
    }
}

/// Copies `base.$field` into `config.$field` when the CLI left it at its default.
macro_rules! merge_unset {
    ($config:ident, $base:ident, $defaults:ident, $($field:ident),+ $(,)?) => {
        $(
            if $config.$field == $defaults.$field && $base.$field != $defaults.$field {
                $config.$field = $base.$field.clone();
            }
        )+
    };
}

impl AgentConfig {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = AgentConfig::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// CLI arguments (with their env fallbacks) layered over the TOML document
    /// in `RASK_AGENT_CONFIG`, when present.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = AgentConfig::parse_from(args);

        if let Ok(document) = std::env::var(CONFIG_ENV) {
            let base: AgentConfig = toml::from_str(&document)?;
            let defaults = AgentConfig::default();
            merge_unset!(
                config,
                base,
                defaults,
                application_id,
                logs_endpoint,
                rum_endpoint,
                replay_endpoint,
                replica_logs_endpoint,
                replica_rum_endpoint,
                batch_bytes_limit,
                max_batch_size,
                max_message_size,
                flush_timeout_ms,
                max_segment_size,
                max_segment_duration_ms,
                beacon_bytes_limit,
                compress_batches,
                request_timeout_secs,
                connection_timeout_secs,
                max_connections,
                unload_grace_ms,
                log_level,
            );
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let mut config: AgentConfig = toml::from_str(document)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.flush_timeout = Duration::from_millis(self.flush_timeout_ms);
        self.max_segment_duration = Duration::from_millis(self.max_segment_duration_ms);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.connection_timeout = Duration::from_secs(self.connection_timeout_secs);
        self.unload_grace = Duration::from_millis(self.unload_grace_ms);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = [
            ("logs", &self.logs_endpoint),
            ("rum", &self.rum_endpoint),
            ("replay", &self.replay_endpoint),
            ("replica logs", &self.replica_logs_endpoint),
            ("replica rum", &self.replica_rum_endpoint),
        ];
        for (name, endpoint) in endpoints {
            if let Some(endpoint) = endpoint {
                parse_endpoint(name, endpoint)?;
            }
        }

        if self.logs_endpoint.is_none() && self.rum_endpoint.is_none() && self.replay_endpoint.is_none() {
            return Err(ConfigError::InvalidConfig(
                "At least one of logs, rum or replay endpoint must be configured".to_string(),
            ));
        }
        if self.replica_logs_endpoint.is_some() && self.logs_endpoint.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Replica logs endpoint requires a logs endpoint".to_string(),
            ));
        }
        if self.replica_rum_endpoint.is_some() && self.rum_endpoint.is_none() {
            return Err(ConfigError::InvalidConfig(
                "Replica rum endpoint requires a rum endpoint".to_string(),
            ));
        }

        if self.application_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Application id must not be empty".to_string(),
            ));
        }

        let limits = [
            ("Batch bytes limit", self.batch_bytes_limit as u64),
            ("Max batch size", self.max_batch_size as u64),
            ("Max message size", self.max_message_size as u64),
            ("Flush timeout", self.flush_timeout_ms),
            ("Max segment duration", self.max_segment_duration_ms),
            ("Beacon bytes limit", self.beacon_bytes_limit as u64),
            ("Request timeout", self.request_timeout_secs),
            ("Connection timeout", self.connection_timeout_secs),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.max_batch_size,
            batch_bytes_limit: self.batch_bytes_limit,
            max_message_size: self.max_message_size,
            compress: self.compress_batches,
        }
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            max_segment_size: self.max_segment_size,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: self.request_timeout,
            connection_timeout: self.connection_timeout,
            max_connections: self.max_connections,
            beacon_bytes_limit: self.beacon_bytes_limit,
            ..ClientConfig::default()
        }
    }
}

/// Parses an optional endpoint; absent endpoints disable their pipeline.
pub fn endpoint_url(name: &str, endpoint: Option<&str>) -> Result<Option<Url>, ConfigError> {
    endpoint.map(|endpoint| parse_endpoint(name, endpoint)).transpose()
}

fn parse_endpoint(name: &str, endpoint: &str) -> Result<Url, ConfigError> {
    Url::parse(endpoint).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid {name} endpoint URL '{endpoint}': {e}"))
    })
}
