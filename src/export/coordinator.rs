//! Export coordinator for orchestrating export operations
//!
//! This module provides the coordinator that pulls chunks from a source,
//! hands them to a format writer and keeps the progress display current.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::progress::ProgressTracker;
use super::streaming::ChunkSource;
use super::writers::FormatWriter;

/// Result of an export operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportResult {
    /// Number of records exported
    pub records_exported: u64,
    /// Number of chunks consumed, empty ones included
    pub chunks: u64,
    /// File size in bytes
    pub file_size_bytes: u64,
    /// Time taken for export
    pub elapsed_ms: u64,
    /// Whether the export was cancelled
    pub cancelled: bool,
}

/// Coordinator for export operations
///
/// Consumes the source exactly once, writing chunks in the order received.
/// An error from the source or the writer aborts the export and leaves the
/// partially written file in place.
pub struct ExportCoordinator {
    /// Source of chunks
    source: Box<dyn ChunkSource>,
    /// Progress tracker for user feedback
    tracker: ProgressTracker,
    /// Format writer for output
    writer: Box<dyn FormatWriter>,
    /// Cancellation token for aborting export
    cancel_token: Option<CancellationToken>,
}

impl ExportCoordinator {
    /// Create a new export coordinator
    pub fn new(
        source: Box<dyn ChunkSource>,
        tracker: ProgressTracker,
        writer: Box<dyn FormatWriter>,
    ) -> Self {
        Self {
            source,
            tracker,
            writer,
            cancel_token: None,
        }
    }

    /// Set cancellation token for this export operation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Execute the export operation
    ///
    /// # Returns
    /// * `Result<ExportResult>` - Export statistics or error
    pub async fn execute(&mut self) -> Result<ExportResult> {
        let start_time = Instant::now();

        info!("Starting export operation");
        let mut exported = 0u64;
        let mut chunk_count = 0u64;
        let mut cancelled = false;

        loop {
            if self.is_cancelled() {
                info!("Export operation cancelled by user");
                cancelled = true;
                break;
            }

            debug!("Fetching chunk #{}", chunk_count + 1);

            match self.source.next_chunk().await? {
                Some(chunk) => {
                    let count = self.writer.write_chunk(&chunk).await?;

                    exported += count as u64;
                    chunk_count += 1;
                    self.tracker.update(exported);

                    if chunk_count % 10 == 0 {
                        info!(
                            "Progress: {} records exported ({} chunks)",
                            exported, chunk_count
                        );
                    }
                }
                None => {
                    debug!("Chunk source exhausted");
                    break;
                }
            }
        }

        // A cancelled export still finalizes what was written so far
        debug!("Finalizing output file");
        self.writer.finalize().await?;
        if let Err(e) = self.source.close().await {
            warn!("Failed to close chunk source: {}", e);
        }

        self.tracker.finish();
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let file_size_bytes = self.writer.file_size().await?;

        info!(
            "Export {}: {} records, {} chunks, {} bytes, {} ms",
            if cancelled { "cancelled" } else { "completed" },
            exported,
            chunk_count,
            file_size_bytes,
            elapsed_ms
        );

        Ok(ExportResult {
            records_exported: exported,
            chunks: chunk_count,
            file_size_bytes,
            elapsed_ms,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, FetchError};
    use crate::export::writers::test_support::chunk;
    use crate::fetch::Chunk;
    use crate::record::Record;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct MockSource {
        chunks: Vec<Chunk>,
        current: usize,
        fail_at: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
        closed: Arc<Mutex<bool>>,
    }

    impl MockSource {
        fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks,
                current: 0,
                fail_at: None,
                cancel_after: None,
                closed: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl ChunkSource for MockSource {
        async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
            if self.fail_at == Some(self.current) {
                return Err(FetchError::TransientIo(ConnectionError::QueryFailed(
                    "connection reset".to_string(),
                )));
            }
            if let Some((n, token)) = &self.cancel_after {
                if self.current + 1 == *n {
                    token.cancel();
                }
            }
            let next = self.chunks.get(self.current).cloned();
            self.current += 1;
            Ok(next)
        }

        async fn close(&mut self) -> Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MockWriter {
        written: Arc<Mutex<Vec<Record>>>,
        finalized: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl FormatWriter for MockWriter {
        async fn write_chunk(&mut self, chunk: &Chunk) -> Result<usize> {
            self.written.lock().unwrap().extend_from_slice(&chunk.data);
            Ok(chunk.data.len())
        }

        async fn finalize(&mut self) -> Result<()> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }

        async fn file_size(&mut self) -> Result<u64> {
            Ok(self.written.lock().unwrap().len() as u64 * 100)
        }
    }

    fn rows(ids: std::ops::Range<i64>) -> Vec<Record> {
        ids.map(|i| Record::from_pairs([("id", i)])).collect()
    }

    #[tokio::test]
    async fn test_coordinator_basic() {
        let source = MockSource::new(vec![chunk(0, rows(0..2)), chunk(0, vec![]), chunk(0, rows(2..3))]);
        let closed = Arc::clone(&source.closed);
        let writer = MockWriter::default();

        let mut coordinator = ExportCoordinator::new(
            Box::new(source),
            ProgressTracker::new(Some(3), false),
            Box::new(writer.clone()),
        );
        let result = coordinator.execute().await.unwrap();

        assert_eq!(result.records_exported, 3);
        assert_eq!(result.chunks, 3);
        assert_eq!(result.file_size_bytes, 300);
        assert!(!result.cancelled);
        assert!(*writer.finalized.lock().unwrap());
        assert!(*closed.lock().unwrap());
        assert_eq!(*writer.written.lock().unwrap(), rows(0..3));
    }

    #[tokio::test]
    async fn test_coordinator_empty_source() {
        let mut coordinator = ExportCoordinator::new(
            Box::new(MockSource::new(vec![])),
            ProgressTracker::new(None, false),
            Box::new(MockWriter::default()),
        );
        let result = coordinator.execute().await.unwrap();

        assert_eq!(result.records_exported, 0);
        assert_eq!(result.chunks, 0);
    }

    #[tokio::test]
    async fn test_coordinator_cancellation_finalizes_partial_output() {
        let token = CancellationToken::new();
        let mut source = MockSource::new((0..5).map(|i| chunk(0, rows(i..i + 1))).collect());
        source.cancel_after = Some((2, token.clone()));
        let writer = MockWriter::default();

        let mut coordinator = ExportCoordinator::new(
            Box::new(source),
            ProgressTracker::new(None, false),
            Box::new(writer.clone()),
        )
        .with_cancellation(token);
        let result = coordinator.execute().await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.records_exported, 2);
        assert!(*writer.finalized.lock().unwrap());
    }

    #[tokio::test]
    async fn test_coordinator_source_error_aborts() {
        let mut source = MockSource::new(vec![chunk(0, rows(0..2)), chunk(2, rows(2..4))]);
        source.fail_at = Some(1);
        let writer = MockWriter::default();

        let mut coordinator = ExportCoordinator::new(
            Box::new(source),
            ProgressTracker::new(None, false),
            Box::new(writer.clone()),
        );
        let err = coordinator.execute().await.unwrap_err();

        assert!(err.is_transient());
        // what was written stays written, nothing is finalized
        assert_eq!(writer.written.lock().unwrap().len(), 2);
        assert!(!*writer.finalized.lock().unwrap());
    }
}
