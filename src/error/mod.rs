//! Error handling for fetch, stream and export operations.
//!
//! This module provides:
//! - One crate-wide error type covering the whole failure taxonomy
//!   (invalid configuration, bad time input, unknown tables, transient I/O,
//!   output failures, schema mismatches)
//! - Classification and structured formatting of PostgreSQL driver errors
//!
//! # Example
//!
//! ```rust,no_run
//! use tsfetch::error::{FetchError, Result};
//!
//! fn check_chunk_size(chunk_size: usize) -> Result<()> {
//!     if chunk_size == 0 {
//!         return Err(FetchError::InvalidConfig("chunk_size must be positive".into()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod kinds;
pub mod postgres;

// Re-export commonly used types
pub use kinds::{ConfigError, ConnectionError, FetchError, OutputError, Result};
pub use postgres::ErrorInfo;
