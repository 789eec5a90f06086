//! Console output for the `stream`, `count` and `list-tables` commands
//!
//! - [`ChunkFormatter`]: chunk envelopes as pretty JSON, compact JSON lines
//!   or one summary line per chunk
//! - [`TableFormatter`]: the table registry as a table

pub mod table;

pub use table::TableFormatter;

use colored_json::prelude::*;

use crate::error::Result;
use crate::export::{ExportFormat, ExportResult};
use crate::fetch::Chunk;
use crate::query::{TimeRange, format_timestamp};

/// Formatter for chunks printed to stdout
pub struct ChunkFormatter {
    /// Chosen output format
    format: ExportFormat,

    /// Colorize pretty JSON
    use_colors: bool,

    /// Add window range and running total to summary lines
    verbose: bool,
}

impl ChunkFormatter {
    /// Create a new chunk formatter
    ///
    /// # Arguments
    /// * `format` - json prints envelopes pretty, jsonl compact, anything
    ///   else a summary line
    /// * `use_colors` - Enable colored JSON
    /// * `verbose` - Longer summary lines
    pub fn new(format: ExportFormat, use_colors: bool, verbose: bool) -> Self {
        Self {
            format,
            use_colors,
            verbose,
        }
    }

    /// Render one chunk
    ///
    /// # Arguments
    /// * `chunk` - Chunk to render
    ///
    /// # Returns
    /// * `Result<String>` - Rendered text without trailing newline
    pub fn format_chunk(&self, chunk: &Chunk) -> Result<String> {
        match self.format {
            ExportFormat::Json => {
                let json_str = serde_json::to_string_pretty(chunk)?;
                if self.use_colors {
                    Ok(json_str.to_colored_json_auto().unwrap_or(json_str))
                } else {
                    Ok(json_str)
                }
            }
            ExportFormat::JsonL => Ok(serde_json::to_string(chunk)?),
            ExportFormat::Csv | ExportFormat::Parquet => Ok(self.format_summary_line(chunk)),
        }
    }

    fn format_summary_line(&self, chunk: &Chunk) -> String {
        let mut line = format!(
            "Chunk: window {}, offset {}, {} records",
            chunk.window_index, chunk.chunk_offset, chunk.chunk_size
        );
        if self.verbose {
            line.push_str(&format!(
                " [{}, {}) total {}",
                format_timestamp(&chunk.window_start),
                format_timestamp(&chunk.window_end),
                chunk.total_records_so_far
            ));
        }
        line
    }
}

/// Final line of a `stream` run
pub fn format_stream_summary(chunks: u64, records: u64) -> String {
    format!("Streamed {records} records in {chunks} chunks")
}

/// Output of the `count` command
pub fn format_count(table: &str, range: &TimeRange, count: u64, verbose: bool) -> String {
    if verbose {
        format!("{table} {range}: {count} records")
    } else {
        count.to_string()
    }
}

/// Output of the `export` command
pub fn format_export_result(result: &ExportResult, path: &std::path::Path) -> String {
    let status = if result.cancelled {
        "Export cancelled"
    } else {
        "Export completed"
    };
    format!(
        "{status}: {} records in {} chunks written to {} ({} bytes, {:.2}s)",
        result.records_exported,
        result.chunks,
        path.display(),
        result.file_size_bytes,
        result.elapsed_ms as f64 / 1000.0
    )
}
