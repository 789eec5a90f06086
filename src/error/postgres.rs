use std::fmt;

use serde::Serialize;
use tokio_postgres::error::SqlState;

use super::kinds::{ConnectionError, FetchError};

/// Structured error information extracted from PostgreSQL errors.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) column: Option<String>,
}

/// Extract structured information from a driver error.
///
/// Server-side errors carry a SQLSTATE and optional detail/hint; client-side
/// errors (closed connection, type conversion) only carry a message.
pub fn extract_error_info(error: &tokio_postgres::Error) -> ErrorInfo {
    match error.as_db_error() {
        Some(db) => ErrorInfo {
            code: Some(db.code().code().to_string()),
            message: Some(db.message().to_string()),
            detail: db.detail().map(str::to_string),
            hint: db.hint().map(str::to_string),
            table: db.table().map(str::to_string),
            column: db.column().map(str::to_string),
        },
        None => ErrorInfo {
            message: Some(error.to_string()),
            ..ErrorInfo::default()
        },
    }
}

/// Render a driver error as a single line of compact JSON.
///
/// Used by the `Display` impl of [`ConnectionError::Postgres`].
pub fn format_postgres_error(f: &mut fmt::Formatter<'_>, error: &tokio_postgres::Error) -> fmt::Result {
    let info = extract_error_info(error);
    let json = serde_json::to_string(&info).map_err(|_| fmt::Error)?;
    write!(f, "{json}")
}

/// Map a driver error onto the crate taxonomy.
///
/// Undefined columns are schema problems the caller must fix, undefined
/// tables are registry misconfigurations; everything else is treated as a
/// retryable transport failure.
pub fn classify_postgres_error(error: tokio_postgres::Error) -> FetchError {
    match error.code() {
        Some(code) if *code == SqlState::UNDEFINED_COLUMN => {
            let info = extract_error_info(&error);
            FetchError::SchemaMismatch(info.message.unwrap_or_else(|| error.to_string()))
        }
        Some(code) if *code == SqlState::UNDEFINED_TABLE => {
            let info = extract_error_info(&error);
            FetchError::UnknownTable(info.message.unwrap_or_else(|| error.to_string()))
        }
        _ => FetchError::TransientIo(ConnectionError::Postgres(error)),
    }
}
