//! Configuration management for tsfetch
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables (applied by the binary, never by the library core)
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, FetchError, Result};

/// Prefix of the environment variables understood by [`Config::apply_env`].
pub const ENV_PREFIX: &str = "TSFETCH_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Chunking, windowing and pool configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Table registry entries keyed by table name
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the individual fields
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// Chunking, windowing and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Records per page query
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Width of one time window in minutes
    #[serde(default = "default_time_interval_minutes")]
    pub time_interval_minutes: u32,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connections opened eagerly at startup
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    /// Seconds to wait for a free pooled connection (0 waits forever)
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// Health-check idle connections before handing them out
    #[serde(default)]
    pub validate_on_acquire: bool,

    /// Page query retries on transient errors (0 disables retrying)
    #[serde(default)]
    pub retry_attempts: usize,

    /// First retry delay in milliseconds; later delays back off exponentially
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Parquet row-group size; unset means one row group per chunk
    #[serde(default)]
    pub row_group_size: Option<usize>,

    /// Write whole chunk envelopes instead of bare records (json/jsonl)
    #[serde(default)]
    pub include_metadata: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Registry entry for one table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    /// Column holding the record timestamp
    pub time_field: String,

    /// Unique key used as the pagination tiebreak
    pub primary_key: String,

    /// Explicit ordering key; defaults to `[time_field, primary_key]`
    #[serde(default)]
    pub order_fields: Vec<String>,

    #[serde(default)]
    pub description: String,
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "postgres".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    1000
}

fn default_time_interval_minutes() -> u32 {
    60
}

fn default_max_connections() -> usize {
    3
}

fn default_min_idle() -> usize {
    1
}

fn default_acquire_timeout() -> u64 {
    300
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            time_interval_minutes: default_time_interval_minutes(),
            max_connections: default_max_connections(),
            min_idle: default_min_idle(),
            acquire_timeout: default_acquire_timeout(),
            validate_on_acquire: false,
            retry_attempts: 0,
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            row_group_size: None,
            include_metadata: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::InvalidFormat(format!("{}: {}", path.display(), e))
            }
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from an explicit path or the default location
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tsfetch")
            .join("config.toml")
    }

    /// Overlay database settings from environment variables
    ///
    /// Reads `TSFETCH_DATABASE_URL`, `TSFETCH_DB_HOST`, `TSFETCH_DB_PORT`,
    /// `TSFETCH_DB_NAME`, `TSFETCH_DB_USER` and `TSFETCH_DB_PASSWORD` through
    /// the supplied lookup function.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = var("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = var("DB_PORT") {
            self.database.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{ENV_PREFIX}DB_PORT"),
                value: port.clone(),
            })?;
        }
        if let Some(name) = var("DB_NAME") {
            self.database.dbname = name;
        }
        if let Some(user) = var("DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = var("DB_PASSWORD") {
            self.database.password = Some(password);
        }
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        let fetch = &self.fetch;
        if fetch.chunk_size == 0 {
            return Err(FetchError::invalid_config("chunk_size must be positive"));
        }
        if fetch.time_interval_minutes == 0 {
            return Err(FetchError::invalid_config("time_interval_minutes must be positive"));
        }
        if fetch.max_connections == 0 {
            return Err(FetchError::invalid_config("max_connections must be positive"));
        }
        if fetch.min_idle > fetch.max_connections {
            return Err(FetchError::invalid_config(format!(
                "min_idle ({}) exceeds max_connections ({})",
                fetch.min_idle, fetch.max_connections
            )));
        }
        if fetch.row_group_size == Some(0) {
            return Err(FetchError::invalid_config("row_group_size must be positive"));
        }
        for (name, table) in &self.tables {
            if table.time_field.trim().is_empty() {
                return Err(invalid(&format!("tables.{name}.time_field"), ""));
            }
            if table.primary_key.trim().is_empty() {
                return Err(invalid(&format!("tables.{name}.primary_key"), ""));
            }
        }
        Ok(())
    }

    /// Get pool acquire timeout as Duration (None waits forever)
    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.fetch.acquire_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout)
    }
}

fn invalid(field: &str, value: &str) -> FetchError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl TableConfig {
    pub fn new(time_field: &str, primary_key: &str) -> Self {
        Self {
            time_field: time_field.to_string(),
            primary_key: primary_key.to_string(),
            order_fields: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_order_fields(mut self, fields: &[&str]) -> Self {
        self.order_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Ordering key used for deterministic pagination
    ///
    /// Always starts with the time field and always contains the primary
    /// key, so rows sharing a timestamp keep a stable order across pages.
    pub fn ordering_key(&self) -> Vec<String> {
        let mut key = vec![self.time_field.clone()];
        for field in &self.order_fields {
            if !key.contains(field) {
                key.push(field.clone());
            }
        }
        if !key.contains(&self.primary_key) {
            key.push(self.primary_key.clone());
        }
        key
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
