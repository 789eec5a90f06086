//! Export sink for chunk streams
//!
//! This module consumes a chunk stream exactly once and writes it to a file
//! in one of four formats:
//! - JSON: one top-level array, written at the end (not constant memory)
//! - JSON Lines: one record per line as chunks arrive
//! - CSV: header from the selected fields or the first non-empty chunk
//! - Parquet: ZSTD-compressed row groups, one per chunk or per
//!   `row_group_size` rows
//!
//! # Architecture
//!
//! 1. **ChunkSource**: anything that yields chunks one at a time
//! 2. **ProgressTracker**: progress bar or spinner on stderr
//! 3. **FormatWriter**: format-specific framing and encoding
//!
//! These are driven by the **ExportCoordinator**, which also handles
//! cooperative cancellation between chunks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use tsfetch::config::Config;
//! use tsfetch::export::{ExportFormat, ExportOptions, export};
//! use tsfetch::fetch::Fetcher;
//! use tsfetch::query::TimeRange;
//! use tsfetch::store::MemoryStore;
//!
//! # async fn run() -> tsfetch::Result<()> {
//! let fetcher = Fetcher::from_config(MemoryStore::new(), &Config::default())?;
//! let spec = fetcher.query("tweets")?;
//! let range = TimeRange::parse("2024-01-01", "2024-01-02")?;
//! let stream = fetcher.stream_by_windows(&spec, range, 60, 1000)?;
//!
//! let options = ExportOptions::new(ExportFormat::JsonL);
//! let result = export(Box::new(stream), Path::new("tweets.jsonl"), &options, None).await?;
//! println!("{} records", result.records_exported);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod progress;
pub mod streaming;
pub mod writers;

pub use coordinator::{ExportCoordinator, ExportResult};
pub use progress::ProgressTracker;
pub use streaming::ChunkSource;
pub use writers::{CsvWriter, FormatWriter, JsonLWriter, JsonWriter, ParquetWriter};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::error::{FetchError, Result};

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    /// Pretty-printed JSON array
    #[default]
    Json,
    /// JSON Lines (one record per line)
    #[value(name = "jsonl")]
    JsonL,
    /// Comma-separated values with a header row
    Csv,
    /// Apache Parquet, ZSTD compressed
    Parquet,
}

impl ExportFormat {
    /// Conventional file extension for the format
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonL => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }

    /// Format implied by the file extension of `path`, if recognized
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Whether chunk envelopes can be written in this format
    pub fn supports_envelopes(self) -> bool {
        matches!(self, ExportFormat::Json | ExportFormat::JsonL)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::JsonL),
            "csv" => Ok(ExportFormat::Csv),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(FetchError::invalid_config(format!(
                "unsupported format '{other}' (expected json, jsonl, csv or parquet)"
            ))),
        }
    }
}

/// Options for one export run
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Write chunk envelopes instead of bare records (json and jsonl only)
    pub include_metadata: bool,
    /// Column order for csv and parquet when a projection is in effect
    pub select_fields: Option<Vec<String>>,
    /// Parquet rows per row group; `None` flushes one group per chunk
    pub row_group_size: Option<usize>,
    pub show_progress: bool,
    /// Expected record count for the progress bar
    pub total: Option<u64>,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Defaults taken from the `[fetch]` section.
    pub fn from_config(format: ExportFormat, config: &FetchConfig) -> Self {
        Self {
            format,
            include_metadata: config.include_metadata,
            row_group_size: config.row_group_size,
            ..Self::default()
        }
    }

    pub fn with_select_fields(mut self, fields: Option<Vec<String>>) -> Self {
        self.select_fields = fields;
        self
    }

    pub fn with_progress(mut self, show: bool, total: Option<u64>) -> Self {
        self.show_progress = show;
        self.total = total;
        self
    }
}

/// Create the writer for `options.format` at `path`
///
/// # Arguments
/// * `path` - Output file path (parent directory must exist)
/// * `options` - Export options
///
/// # Returns
/// * `Result<Box<dyn FormatWriter>>` - Writer or `OutputError`
pub async fn create_writer(path: &Path, options: &ExportOptions) -> Result<Box<dyn FormatWriter>> {
    if options.include_metadata && !options.format.supports_envelopes() {
        warn!(
            "--include-metadata has no effect on {} output; writing bare records",
            options.format
        );
    }

    let writer: Box<dyn FormatWriter> = match options.format {
        ExportFormat::Json => Box::new(JsonWriter::new(path, options.include_metadata).await?),
        ExportFormat::JsonL => Box::new(JsonLWriter::new(path, options.include_metadata).await?),
        ExportFormat::Csv => Box::new(CsvWriter::new(path, options.select_fields.clone()).await?),
        ExportFormat::Parquet => Box::new(
            ParquetWriter::new(path, options.select_fields.clone(), options.row_group_size).await?,
        ),
    };
    Ok(writer)
}

/// Export a chunk source to `path`
///
/// # Arguments
/// * `source` - Chunks to export, consumed exactly once
/// * `path` - Output file path
/// * `options` - Format and writer options
/// * `cancel` - Optional token checked between chunks
pub async fn export(
    source: Box<dyn ChunkSource>,
    path: &Path,
    options: &ExportOptions,
    cancel: Option<CancellationToken>,
) -> Result<ExportResult> {
    let writer = create_writer(path, options).await?;
    let tracker = ProgressTracker::new(options.total, options.show_progress);

    info!(format = %options.format, "Exporting to {}", path.display());

    let mut coordinator = ExportCoordinator::new(source, tracker, writer);
    if let Some(token) = cancel {
        coordinator = coordinator.with_cancellation(token);
    }
    coordinator.execute().await
}
