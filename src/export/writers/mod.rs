//! Format writers for export operations
//!
//! This module provides a unified interface for writing chunks to the
//! supported file formats (JSON array, JSON Lines, CSV, Parquet).

use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::BufWriter;

use crate::error::{OutputError, Result};
use crate::fetch::Chunk;

pub mod csv;
pub mod json;
pub mod jsonl;
pub mod parquet;

pub use csv::CsvWriter;
pub use json::JsonWriter;
pub use jsonl::JsonLWriter;
pub use parquet::ParquetWriter;

/// Trait for writing chunks to different file formats
#[async_trait]
pub trait FormatWriter: Send {
    /// Write the records (or the envelope) of one chunk
    ///
    /// # Arguments
    /// * `chunk` - Chunk as yielded by the stream
    ///
    /// # Returns
    /// * `Result<usize>` - Number of records written
    async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize>;

    /// Finalize the output (flush buffers, write footers, etc.)
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    async fn finalize(&mut self) -> Result<()>;

    /// Get the current file size in bytes
    ///
    /// # Returns
    /// * `Result<u64>` - File size in bytes (0 if nothing was created)
    async fn file_size(&mut self) -> Result<u64>;
}

/// Helper function to create a buffered file writer
///
/// # Arguments
/// * `path` - File path to create (truncated if it exists)
///
/// # Returns
/// * `Result<BufWriter<File>>` - Buffered writer or error
pub(crate) async fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .await
        .map_err(|source| OutputError::CreateFailed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(BufWriter::with_capacity(8 * 1024 * 1024, file)) // 8MB buffer
}

/// Helper function to validate the output path
///
/// The parent directory must already exist; it is never created.
///
/// # Arguments
/// * `path` - File path to validate
///
/// # Returns
/// * `Result<()>` - Success or `OutputError`
pub(crate) fn validate_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(OutputError::IsDirectory(path.to_path_buf()).into());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(OutputError::DirectoryNotFound(parent.to_path_buf()).into());
        }
    }

    Ok(())
}

/// Size of the file at `path`, or 0 if it does not exist.
pub(crate) async fn file_size_or_zero(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(crate::error::FetchError::write_failed(
            "Failed to get file metadata",
            e,
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::fetch::{Chunk, ChunkMetadata};
    use crate::record::Record;

    /// Chunk with the given records and fixed window and metadata.
    pub fn chunk(offset: usize, data: Vec<Record>) -> Chunk {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Chunk {
            window_index: 0,
            window_start: start,
            window_end: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            chunk_offset: offset,
            chunk_size: data.len(),
            total_records_so_far: (offset + data.len()) as u64,
            data,
            metadata: ChunkMetadata {
                table_name: "tweets".to_string(),
                time_field: "created_at_ts".to_string(),
                query_time: start,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;

    #[test]
    fn test_validate_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path(&dir.path().join("out.jsonl")).is_ok());
        assert!(validate_path(Path::new("relative.csv")).is_ok());

        assert!(matches!(
            validate_path(&dir.path().join("missing").join("out.csv")),
            Err(FetchError::Output(OutputError::DirectoryNotFound(_)))
        ));
        assert!(matches!(
            validate_path(dir.path()),
            Err(FetchError::Output(OutputError::IsDirectory(_)))
        ));
    }
}
