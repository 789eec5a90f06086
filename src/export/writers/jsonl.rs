//! JSON Lines writer for export operations
//!
//! Each record (or, in envelope mode, each chunk envelope) becomes one line
//! of compact JSON. Nothing is buffered beyond the file writer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::fetch::Chunk;

use super::{FormatWriter, create_file, file_size_or_zero, validate_path};

/// Writer for JSON Lines format
pub struct JsonLWriter {
    /// Buffered file writer
    writer: BufWriter<File>,
    /// Path to the output file
    path: PathBuf,
    /// Write whole chunk envelopes instead of bare records
    envelopes: bool,
    /// Number of records written
    written: usize,
    /// Reused line buffer
    line: Vec<u8>,
}

impl JsonLWriter {
    /// Create a new JSON Lines writer
    ///
    /// # Arguments
    /// * `path` - Output file path
    /// * `envelopes` - One chunk envelope per line instead of one record
    ///
    /// # Returns
    /// * `Result<Self>` - New writer instance or error
    pub async fn new(path: &Path, envelopes: bool) -> Result<Self> {
        validate_path(path)?;
        let writer = create_file(path).await?;

        debug!("Created JSON Lines writer for: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            envelopes,
            written: 0,
            line: Vec::with_capacity(1024),
        })
    }

    async fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, value)?;
        self.line.push(b'\n');
        self.writer
            .write_all(&self.line)
            .await
            .map_err(|e| FetchError::write_failed("Failed to write to file", e))
    }
}

#[async_trait]
impl FormatWriter for JsonLWriter {
    async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize> {
        if self.envelopes {
            self.write_line(chunk).await?;
        } else {
            for record in &chunk.data {
                self.write_line(record).await?;
            }
        }

        self.written += chunk.data.len();
        debug!(
            "Wrote {} records to JSON Lines (total: {})",
            chunk.data.len(),
            self.written
        );

        Ok(chunk.data.len())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| FetchError::write_failed("Failed to flush file", e))?;

        debug!(
            "Finalized JSON Lines file: {} ({} records)",
            self.path.display(),
            self.written
        );
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
    use crate::record::{FieldValue, Record};

    fn person(name: &str, age: i64) -> Record {
        Record::from_pairs([("name", FieldValue::from(name)), ("age", FieldValue::Int(age))])
    }

    #[tokio::test]
    async fn test_jsonl_writer_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = JsonLWriter::new(&path, false).await.unwrap();

        let written = writer
            .write_chunk(&chunk(0, vec![person("Alice", 30), person("Bob", 25)]))
            .await
            .unwrap();
        assert_eq!(written, 2);
        writer.write_chunk(&chunk(2, vec![])).await.unwrap();
        writer.write_chunk(&chunk(2, vec![person("Carol", 41)])).await.unwrap();
        writer.finalize().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![
            r#"{"name":"Alice","age":30}"#,
            r#"{"name":"Bob","age":25}"#,
            r#"{"name":"Carol","age":41}"#,
        ]);
        assert_eq!(writer.file_size().await.unwrap(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_jsonl_writer_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = JsonLWriter::new(&path, true).await.unwrap();

        writer.write_chunk(&chunk(0, vec![person("Alice", 30)])).await.unwrap();
        writer.write_chunk(&chunk(1, vec![])).await.unwrap();
        writer.finalize().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let envelopes: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0]["data"][0]["name"], "Alice");
        assert_eq!(envelopes[1]["chunk_size"], 0);
        assert_eq!(envelopes[1]["metadata"]["table_name"], "tweets");
    }

    #[tokio::test]
    async fn test_jsonl_writer_invalid_directory() {
        let result = JsonLWriter::new(Path::new("/nonexistent/directory/file.jsonl"), false).await;
        assert!(result.is_err());
    }
}
