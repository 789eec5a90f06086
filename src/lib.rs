//! tsfetch library
//!
//! Streams large time-ordered record sets out of a relational time-series
//! store without loading the full result into memory. A query range is
//! split into time windows, each window is paged with LIMIT/OFFSET, and the
//! resulting chunks are handed to the caller or written to a file.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `connection`: Connection traits and the fixed-capacity pool
//! - `error`: Error types and handling
//! - `export`: Export sink and format writers
//! - `fetch`: Window planner, page reader and chunk stream
//! - `formatter`: Console output
//! - `query`: Time ranges, query specs and the table registry
//! - `record`: Typed rows
//! - `store`: PostgreSQL and in-memory backends
//!
//! # Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use tsfetch::{Config, Fetcher, TimeRange, store::PgConnectionFactory};
//!
//! #[tokio::main]
//! async fn main() -> tsfetch::Result<()> {
//!     let config = Config::default();
//!     let factory = PgConnectionFactory::from_url("postgres://reader@localhost/feeds")?;
//!     let fetcher = Fetcher::from_config(factory, &config)?;
//!
//!     let spec = fetcher.query("tweets")?;
//!     let range = TimeRange::parse("2024-01-01", "2024-01-02")?;
//!     let stream = fetcher.stream_by_windows(&spec, range, 60, 1000)?.into_stream();
//!
//!     let chunks: Vec<_> = stream.try_collect().await?;
//!     println!("{} chunks", chunks.len());
//!
//!     fetcher.close();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod fetch;
pub mod formatter;
pub mod query;
pub mod record;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use connection::{ConnectionPool, PoolConfig};
pub use error::{FetchError, Result};
pub use export::{ExportFormat, ExportOptions, ExportResult};
pub use fetch::{Chunk, ChunkStream, Fetcher, StreamMode};
pub use query::{QuerySpec, TableRegistry, TimeRange};
pub use record::{FieldValue, Record};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
