//! JSON array writer for export operations
//!
//! The output is a single top-level array, so every record has to be held
//! until [`finalize`](FormatWriter::finalize) writes it in one go. Memory use
//! grows with the export; prefer JSON Lines for large ranges.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::fetch::Chunk;
use crate::record::Record;

use super::{FormatWriter, create_file, file_size_or_zero, validate_path};

enum Buffered {
    Records(Vec<Record>),
    Envelopes(Vec<Chunk>),
}

/// Writer for pretty-printed JSON arrays
pub struct JsonWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    buffered: Buffered,
    finalized: bool,
}

impl JsonWriter {
    /// Create a new JSON writer
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `envelopes` - Array of chunk envelopes instead of an array of records
    pub async fn new(path: &Path, envelopes: bool) -> Result<Self> {
        validate_path(path)?;
        let writer = create_file(path).await?;

        debug!("Created JSON writer for: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            buffered: if envelopes {
                Buffered::Envelopes(Vec::new())
            } else {
                Buffered::Records(Vec::new())
            },
            finalized: false,
        })
    }
}

#[async_trait]
impl FormatWriter for JsonWriter {
    async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize> {
        match &mut self.buffered {
            Buffered::Records(records) => records.extend(chunk.data.iter().cloned()),
            Buffered::Envelopes(chunks) => chunks.push(chunk.clone()),
        }
        Ok(chunk.data.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let body = match &self.buffered {
            Buffered::Records(records) => serde_json::to_vec_pretty(records)?,
            Buffered::Envelopes(chunks) => serde_json::to_vec_pretty(chunks)?,
        };
        self.writer
            .write_all(&body)
            .await
            .map_err(|e| FetchError::write_failed("Failed to write to file", e))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| FetchError::write_failed("Failed to write to file", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| FetchError::write_failed("Failed to flush file", e))?;
        self.finalized = true;

        let count = match &self.buffered {
            Buffered::Records(records) => records.len(),
            Buffered::Envelopes(chunks) => chunks.iter().map(|c| c.data.len()).sum(),
        };
        debug!("Finalized JSON file: {} ({} records)", self.path.display(), count);
        Ok(())
    }

    async fn file_size(&mut self) -> Result<u64> {
        file_size_or_zero(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::writers::test_support::chunk;
    use crate::record::FieldValue;

    #[tokio::test]
    async fn test_json_writer_writes_one_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::new(&path, false).await.unwrap();

        writer
            .write_chunk(&chunk(0, vec![Record::from_pairs([("id", 1i64)])]))
            .await
            .unwrap();
        writer
            .write_chunk(&chunk(1, vec![Record::from_pairs([("id", 2i64)])]))
            .await
            .unwrap();
        // nothing reaches the file before finalize
        assert_eq!(writer.file_size().await.unwrap(), 0);

        writer.finalize().await.unwrap();
        writer.finalize().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(value, serde_json::json!([{"id": 1}, {"id": 2}]));
    }

    #[tokio::test]
    async fn test_json_writer_empty_export_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::new(&path, false).await.unwrap();
        writer.finalize().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.trim(), "[]");
    }

    #[tokio::test]
    async fn test_json_writer_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut writer = JsonWriter::new(&path, true).await.unwrap();

        writer
            .write_chunk(&chunk(0, vec![Record::from_pairs([("id", FieldValue::Null)])]))
            .await
            .unwrap();
        writer.finalize().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(value[0]["chunk_offset"], 0);
        assert_eq!(value[0]["data"], serde_json::json!([{"id": null}]));
    }
}
