//! Stream orchestrator: windows × pages → chunks
//!
//! [`ChunkStream`] walks the window plan in order and reads each window to
//! exhaustion before starting the next one. It is a pull cursor
//! ([`ChunkStream::next_chunk`]) with a [`futures::Stream`] adaptor
//! ([`ChunkStream::into_stream`]).

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::Stream;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::connection::{ConnectionFactory, ConnectionPool};
use crate::error::{FetchError, Result};
use crate::query::QuerySpec;

use super::chunk::Chunk;
use super::planner::{Window, WindowPlan};
use super::reader::{Page, PageReader};

/// Page query retry settings. The default never retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.retry_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
    }
}

struct ActiveWindow<F: ConnectionFactory> {
    window: Window,
    reader: PageReader<F>,
    records: u64,
    pages: usize,
}

/// Lazy sequence of chunks for one stream invocation.
pub struct ChunkStream<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
    spec: Arc<QuerySpec>,
    plan: WindowPlan,
    chunk_size: usize,
    retry: RetryPolicy,
    active: Option<ActiveWindow<F>>,
    total_records: u64,
    chunks: u64,
    finished: bool,
}

impl<F: ConnectionFactory> ChunkStream<F> {
    pub(crate) fn new(
        pool: ConnectionPool<F>,
        spec: Arc<QuerySpec>,
        plan: WindowPlan,
        chunk_size: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FetchError::invalid_config(
                "chunk_size must be a positive integer",
            ));
        }
        Ok(Self {
            pool,
            spec,
            plan,
            chunk_size,
            retry,
            active: None,
            total_records: 0,
            chunks: 0,
            finished: false,
        })
    }

    /// Next chunk, or `None` when every window has been read.
    ///
    /// On error nothing is consumed: calling again re-issues the page that
    /// failed.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let active = match self.active.as_mut() {
                None => {
                    self.open_next_window()?;
                    continue;
                }
                Some(active) if active.reader.is_exhausted() => {
                    self.close_window();
                    continue;
                }
                Some(active) => active,
            };

            let page = fetch_page(&active.reader, &self.retry).await?;
            active.reader.advance(&page);
            active.pages += 1;
            active.records += page.len() as u64;
            self.total_records += page.len() as u64;
            self.chunks += 1;

            return Ok(Some(Chunk::from_page(
                &active.window,
                page,
                self.total_records,
                &self.spec,
            )));
        }
    }

    fn close_window(&mut self) {
        if let Some(done) = self.active.take() {
            debug!(
                window = done.window.index + 1,
                pages = done.pages,
                records = done.records,
                "Window finished"
            );
        }
    }

    fn open_next_window(&mut self) -> Result<()> {
        match self.plan.next() {
            Some(window) => {
                info!(
                    "Processing window {}/{}: {}",
                    window.index + 1,
                    self.plan.total(),
                    window.range()
                );
                let reader = PageReader::new(
                    self.pool.clone(),
                    Arc::clone(&self.spec),
                    window.range(),
                    self.chunk_size,
                )?;
                self.active = Some(ActiveWindow {
                    window,
                    reader,
                    records: 0,
                    pages: 0,
                });
            }
            None => {
                self.finished = true;
                info!(
                    table = self.spec.table(),
                    windows = self.plan.total(),
                    chunks = self.chunks,
                    records = self.total_records,
                    "Stream complete"
                );
            }
        }
        Ok(())
    }

    /// Start over from the first window and offset 0.
    pub fn restart(&mut self) {
        self.plan.reset();
        self.active = None;
        self.total_records = 0;
        self.chunks = 0;
        self.finished = false;
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn window_count(&self) -> usize {
        self.plan.total()
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn chunks_yielded(&self) -> u64 {
        self.chunks
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapt into a `futures::Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk>> {
        futures::stream::try_unfold(self, |mut stream| async move {
            let chunk = stream.next_chunk().await?;
            Ok::<_, FetchError>(chunk.map(|chunk| (chunk, stream)))
        })
    }
}

/// Fetch the reader's current page, retrying transient failures when the
/// policy allows it.
async fn fetch_page<F: ConnectionFactory>(
    reader: &PageReader<F>,
    retry: &RetryPolicy,
) -> Result<Page> {
    if retry.max_retries == 0 {
        return reader.fetch().await;
    }
    (|| reader.fetch())
        .retry(retry.backoff())
        .when(FetchError::is_transient)
        .notify(|err, dur| {
            warn!(
                offset = reader.offset(),
                "Page query failed, retrying in {:?}: {}", dur, err
            );
        })
        .await
}
