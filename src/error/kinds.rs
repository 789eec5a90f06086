use std::path::PathBuf;
use std::time::Duration;
use std::{fmt, io};

use crate::error::postgres::{classify_postgres_error, format_postgres_error};

/// Crate-wide `Result` type using [`FetchError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Top-level error type for fetch, stream and export operations.
///
/// Validation variants (`InvalidConfig`, `InvalidTimeFormat`, `UnknownTable`)
/// are always raised before any connection is acquired.
#[derive(Debug)]
pub enum FetchError {
    /// Bad chunk size, window interval, pool size, range or field list.
    InvalidConfig(String),

    /// Time input matched none of the accepted formats.
    InvalidTimeFormat(String),

    /// Table is not known to the registry (or to the store).
    UnknownTable(String),

    /// Connection or query failure that the caller may retry.
    TransientIo(ConnectionError),

    /// Export destination could not be written.
    Output(OutputError),

    /// A requested field is not present in the result, or a value does
    /// not fit the column type fixed by earlier rows.
    SchemaMismatch(String),

    /// Configuration file problems.
    Config(ConfigError),

    /// I/O errors outside of export writing.
    Io(io::Error),
}

/// Connection and query transport errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectFailed(String),

    /// A query failed on an established connection.
    QueryFailed(String),

    /// No connection became free within the acquire timeout.
    PoolExhausted { max_size: usize, waited: Duration },

    /// The pool has been closed.
    PoolClosed,

    /// PostgreSQL driver error.
    Postgres(tokio_postgres::Error),
}

/// Export destination errors.
#[derive(Debug)]
pub enum OutputError {
    /// Parent directory of the output path does not exist.
    DirectoryNotFound(PathBuf),

    /// Output path points at a directory.
    IsDirectory(PathBuf),

    /// Output file could not be created.
    CreateFailed { path: PathBuf, source: io::Error },

    /// Writing or flushing the output failed.
    WriteFailed(String),

    /// A format encoder rejected the data.
    Encode(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl FetchError {
    /// Whether the failed operation may succeed if issued again.
    ///
    /// A closed pool never reopens, so `PoolClosed` is not retryable even
    /// though it is reported as a transport error.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::TransientIo(e) if !matches!(e, ConnectionError::PoolClosed))
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        FetchError::InvalidConfig(msg.into())
    }

    pub(crate) fn write_failed(context: &str, err: impl fmt::Display) -> Self {
        FetchError::Output(OutputError::WriteFailed(format!("{context}: {err}")))
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            FetchError::InvalidTimeFormat(input) => write!(
                f,
                "Invalid time format: '{input}' (expected YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or YYYY-MM-DDTHH:MM:SS[Z])"
            ),
            FetchError::UnknownTable(table) => write!(f, "Unknown table: {table}"),
            FetchError::TransientIo(e) => write!(f, "Transient I/O error: {e}"),
            FetchError::Output(e) => write!(f, "Output error: {e}"),
            FetchError::SchemaMismatch(msg) => write!(f, "Schema mismatch: {msg}"),
            FetchError::Config(e) => write!(f, "Configuration error: {e}"),
            FetchError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            ConnectionError::PoolExhausted { max_size, waited } => write!(
                f,
                "Connection pool exhausted: no connection free after {:.1}s (max_connections = {max_size})",
                waited.as_secs_f64()
            ),
            ConnectionError::PoolClosed => write!(f, "Connection pool is closed"),
            ConnectionError::Postgres(e) => format_postgres_error(f, e),
        }
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::DirectoryNotFound(dir) => {
                write!(f, "Directory does not exist: {}", dir.display())
            }
            OutputError::IsDirectory(path) => {
                write!(f, "Output path is a directory: {}", path.display())
            }
            OutputError::CreateFailed { path, source } => {
                write!(f, "Failed to create {}: {source}", path.display())
            }
            OutputError::WriteFailed(msg) => write!(f, "{msg}"),
            OutputError::Encode(msg) => write!(f, "Encoding failed: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::TransientIo(ConnectionError::Postgres(e)) => Some(e),
            FetchError::Output(OutputError::CreateFailed { source, .. }) => Some(source),
            FetchError::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for ConnectionError {}
impl std::error::Error for OutputError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to FetchError ========================= */

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        FetchError::Io(err)
    }
}

impl From<tokio_postgres::Error> for FetchError {
    fn from(err: tokio_postgres::Error) -> Self {
        classify_postgres_error(err)
    }
}

impl From<ConnectionError> for FetchError {
    fn from(err: ConnectionError) -> Self {
        FetchError::TransientIo(err)
    }
}

impl From<OutputError> for FetchError {
    fn from(err: OutputError) -> Self {
        FetchError::Output(err)
    }
}

impl From<ConfigError> for FetchError {
    fn from(err: ConfigError) -> Self {
        FetchError::Config(err)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Output(OutputError::Encode(format!("JSON: {err}")))
    }
}

impl From<csv::Error> for FetchError {
    fn from(err: csv::Error) -> Self {
        FetchError::Output(OutputError::Encode(format!("CSV: {err}")))
    }
}

impl From<arrow::error::ArrowError> for FetchError {
    fn from(err: arrow::error::ArrowError) -> Self {
        FetchError::Output(OutputError::Encode(format!("Arrow: {err}")))
    }
}

impl From<parquet::errors::ParquetError> for FetchError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        FetchError::Output(OutputError::Encode(format!("Parquet: {err}")))
    }
}
