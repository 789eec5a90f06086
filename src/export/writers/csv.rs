//! CSV writer for export operations
//!
//! The header comes from the selected fields when a projection was given,
//! otherwise from the columns of the first non-empty chunk. Later records
//! missing a header column get an empty cell; columns outside the header
//! are dropped with a warning.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::{FetchError, Result};
use crate::fetch::Chunk;
use crate::record::Record;

use super::{FormatWriter, create_file, file_size_or_zero, validate_path};

/// Writer for CSV format
pub struct CsvWriter {
    /// Buffered file writer
    writer: BufWriter<File>,
    /// Path to the output file
    path: PathBuf,
    /// Column headers, fixed once known
    headers: Option<Vec<String>>,
    /// Whether headers have been written
    headers_written: bool,
    /// Whether the dropped-columns warning was already logged
    warned_extra: bool,
    /// Number of records written
    written: usize,
}

impl CsvWriter {
    /// Create a new CSV writer
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `select_fields` - Header order when a field projection is in effect
    ///
    /// # Returns
    /// * `Result<Self>` - New writer instance or error
    pub async fn new(path: &Path, select_fields: Option<Vec<String>>) -> Result<Self> {
        validate_path(path)?;
        let writer = create_file(path).await?;

        debug!("Created CSV writer for: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            headers: select_fields,
            headers_written: false,
            warned_extra: false,
            written: 0,
        })
    }

    /// Encode `records` (and the header row if still pending) into one
    /// buffer.
    fn encode(&mut self, records: &[Record]) -> Result<Vec<u8>> {
        let headers = match &self.headers {
            Some(headers) => headers.clone(),
            None => {
                let columns = records
                    .first()
                    .map(|r| r.columns().to_vec())
                    .unwrap_or_default();
                self.headers = Some(columns.clone());
                columns
            }
        };

        let mut csv = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(records.len() * 64));

        if !self.headers_written {
            csv.write_record(&headers)?;
            self.headers_written = true;
            debug!("Wrote CSV headers: {} fields", headers.len());
        }

        for record in records {
            if !self.warned_extra {
                let extra: Vec<&str> = record
                    .columns()
                    .iter()
                    .filter(|c| !headers.contains(*c))
                    .map(String::as_str)
                    .collect();
                if !extra.is_empty() {
                    warn!(
                        "CSV header is fixed; dropping columns not in it: {}",
                        extra.join(", ")
                    );
                    self.warned_extra = true;
                }
            }
            csv.write_record(headers.iter().map(|name| {
                record
                    .get(name)
                    .map(|value| value.to_plain_text())
                    .unwrap_or_default()
            }))?;
        }

        csv.into_inner()
            .map_err(|e| FetchError::write_failed("Failed to encode CSV", e.error()))
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| FetchError::write_failed("Failed to write to file", e))
    }
}

#[async_trait]
impl FormatWriter for CsvWriter {
    async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize> {
        if chunk.data.is_empty() {
            return Ok(0);
        }

        let bytes = self.encode(&chunk.data)?;
        self.write_bytes(&bytes).await?;

        self.written += chunk.data.len();
        debug!(
            "Wrote {} records to CSV (total: {})",
            chunk.data.len(),
            self.written
        );

        Ok(chunk.data.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        // A projection fixes the header even when no rows arrived
        if !self.headers_written && self.headers.is_some() {
            let bytes = self.encode(&[])?;
            self.write_bytes(&bytes).await?;
        }

        self.writer
            .flush()
            .await
            .map_err(|e| FetchError::write_failed("Failed to flush file", e))?;

        debug!("Finalized CSV file: {} ({} records)", self.path.display(), self.written);
        Ok(())
    }

    async fn file_size(&mut self) -> Result<u64> {
        file_size_or_zero(&self.path).await
    }
}
