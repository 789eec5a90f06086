//! Time-windowed, chunked fetching
//!
//! This module ties the pieces together:
//! - [`planner`]: splits a time range into windows
//! - [`reader`]: pages through one window with LIMIT/OFFSET
//! - [`stream`]: walks windows and pages in order, yielding [`Chunk`]s
//! - [`chunk`]: the chunk envelope
//!
//! [`Fetcher`] is the entry point. It owns the connection pool and the
//! table registry and hands out lazy [`ChunkStream`]s. Building a stream
//! validates its arguments but opens no connection; the first page query
//! happens on the first `next_chunk` call.
//!
//! # Example
//!
//! ```rust,no_run
//! use tsfetch::config::Config;
//! use tsfetch::fetch::Fetcher;
//! use tsfetch::query::TimeRange;
//! use tsfetch::store::MemoryStore;
//!
//! # async fn run() -> tsfetch::Result<()> {
//! let fetcher = Fetcher::from_config(MemoryStore::new(), &Config::default())?;
//! let spec = fetcher.query("tweets")?;
//! let range = TimeRange::parse("2024-01-01", "2024-01-02")?;
//!
//! let mut stream = fetcher.stream_by_windows(&spec, range, 60, 1000)?;
//! while let Some(chunk) = stream.next_chunk().await? {
//!     println!("window {} offset {}: {} rows", chunk.window_index, chunk.chunk_offset, chunk.chunk_size);
//! }
//! fetcher.close();
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod planner;
pub mod reader;
pub mod stream;

pub use chunk::{Chunk, ChunkMetadata};
pub use planner::{Window, WindowPlan, plan};
pub use reader::{Page, PageReader};
pub use stream::{ChunkStream, RetryPolicy};

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, FetchConfig};
use crate::connection::{ConnectionFactory, ConnectionPool, PoolConfig};
use crate::error::{FetchError, Result};
use crate::query::{QuerySpec, TableRegistry, TimeRange};

/// How a stream partitions its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Consecutive windows of `time_interval_minutes`
    #[default]
    Windows,
    /// One window covering the whole range
    Chunks,
}

/// Defaults applied by [`Fetcher::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub chunk_size: usize,
    pub time_interval_minutes: u32,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl FetchSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            time_interval_minutes: config.time_interval_minutes,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(FetchError::invalid_config(
                "chunk_size must be a positive integer",
            ));
        }
        if self.time_interval_minutes == 0 {
            return Err(FetchError::invalid_config(
                "time_interval_minutes must be a positive integer",
            ));
        }
        Ok(())
    }
}

/// Owns the pool and registry for a series of fetches.
pub struct Fetcher<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
    registry: TableRegistry,
    settings: FetchSettings,
}

impl<F: ConnectionFactory> Fetcher<F> {
    /// # Errors
    /// * `InvalidConfig` when the settings carry a zero chunk size or interval
    pub fn new(
        pool: ConnectionPool<F>,
        registry: TableRegistry,
        settings: FetchSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            pool,
            registry,
            settings,
        })
    }

    /// Build pool, registry and settings from a loaded configuration.
    pub fn from_config(factory: F, config: &Config) -> Result<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(factory, PoolConfig::from_config(config))?;
        Self::new(
            pool,
            TableRegistry::from_config(&config.tables),
            FetchSettings::from_config(&config.fetch),
        )
    }

    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Resolve `table` into a query spec.
    pub fn query(&self, table: &str) -> Result<QuerySpec> {
        QuerySpec::new(&self.registry, table)
    }

    /// Exact number of rows a stream over `range` would yield.
    pub async fn get_count(&self, spec: &QuerySpec, range: &TimeRange) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let count = conn.fetch_count(spec, range).await?;
        conn.release();
        info!(table = spec.table(), %range, count, "Counted rows");
        Ok(count)
    }

    /// Page through the whole range as a single window.
    pub fn read(
        &self,
        spec: &QuerySpec,
        range: TimeRange,
        chunk_size: usize,
    ) -> Result<ChunkStream<F>> {
        self.stream_by_chunks(spec, range, chunk_size)
    }

    /// Windows of `interval_minutes`, each paged with `chunk_size`.
    pub fn stream_by_windows(
        &self,
        spec: &QuerySpec,
        range: TimeRange,
        interval_minutes: u32,
        chunk_size: usize,
    ) -> Result<ChunkStream<F>> {
        let plan = plan(range, interval_minutes)?;
        info!(
            table = spec.table(),
            %range,
            windows = plan.total(),
            interval_minutes,
            chunk_size,
            "Streaming by time windows"
        );
        self.build(spec, plan, chunk_size)
    }

    /// One implicit window covering `range`, paged with `chunk_size`.
    pub fn stream_by_chunks(
        &self,
        spec: &QuerySpec,
        range: TimeRange,
        chunk_size: usize,
    ) -> Result<ChunkStream<F>> {
        info!(table = spec.table(), %range, chunk_size, "Streaming by chunks");
        self.build(spec, WindowPlan::single(range), chunk_size)
    }

    /// Stream with the configured chunk size and interval.
    pub fn stream(
        &self,
        spec: &QuerySpec,
        range: TimeRange,
        mode: StreamMode,
    ) -> Result<ChunkStream<F>> {
        match mode {
            StreamMode::Windows => self.stream_by_windows(
                spec,
                range,
                self.settings.time_interval_minutes,
                self.settings.chunk_size,
            ),
            StreamMode::Chunks => self.stream_by_chunks(spec, range, self.settings.chunk_size),
        }
    }

    fn build(&self, spec: &QuerySpec, plan: WindowPlan, chunk_size: usize) -> Result<ChunkStream<F>> {
        ChunkStream::new(
            self.pool.clone(),
            Arc::new(spec.clone()),
            plan,
            chunk_size,
            self.settings.retry.clone(),
        )
    }

    /// Close the pool. Safe to call more than once.
    pub fn close(&self) {
        self.pool.close_all();
    }
}
