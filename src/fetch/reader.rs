//! Chunked page reader
//!
//! Reads one time range page by page with LIMIT/OFFSET. The offset only
//! moves forward by the number of rows a successful page returned, so a
//! failed page can be re-issued without skipping or repeating rows.
//!
//! Exhaustion is detected by a page shorter than `chunk_size`. This relies
//! on the store never returning a short page for any reason other than
//! running out of rows.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::connection::{ConnectionFactory, ConnectionPool, PageRequest};
use crate::error::{FetchError, Result};
use crate::query::{QuerySpec, TimeRange};
use crate::record::Record;

/// Rows returned by one page query.
#[derive(Debug, Clone)]
pub struct Page {
    /// Offset the page was read at
    pub offset: usize,
    pub records: Vec<Record>,
    /// When the query was issued
    pub query_time: DateTime<Utc>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Cursor over the pages of one time range.
pub struct PageReader<F: ConnectionFactory> {
    pool: ConnectionPool<F>,
    spec: Arc<QuerySpec>,
    range: TimeRange,
    chunk_size: usize,
    offset: usize,
    exhausted: bool,
}

impl<F: ConnectionFactory> PageReader<F> {
    /// # Errors
    /// * `InvalidConfig` when `chunk_size` is zero
    pub fn new(
        pool: ConnectionPool<F>,
        spec: Arc<QuerySpec>,
        range: TimeRange,
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(FetchError::invalid_config(
                "chunk_size must be a positive integer",
            ));
        }
        Ok(Self {
            pool,
            spec,
            range,
            chunk_size,
            offset: 0,
            exhausted: false,
        })
    }

    /// Query the page at the current offset without moving the cursor.
    ///
    /// A pooled connection is held for the duration of the query only.
    pub async fn fetch(&self) -> Result<Page> {
        let query_time = Utc::now();
        let started = Instant::now();

        let mut conn = self.pool.acquire().await?;
        let request = PageRequest::new(&self.spec, self.range, self.chunk_size, self.offset);
        let records = conn.fetch_page(&request).await?;
        conn.release();

        debug!(
            table = self.spec.table(),
            offset = self.offset,
            rows = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched page"
        );

        Ok(Page {
            offset: self.offset,
            records,
            query_time,
        })
    }

    /// Move past `page`, which must have been fetched at the current offset.
    pub fn advance(&mut self, page: &Page) {
        debug_assert_eq!(page.offset, self.offset);
        self.offset += page.len();
        if page.len() < self.chunk_size {
            self.exhausted = true;
        }
    }

    /// Fetch the next page, or `None` once a short page has been returned.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.fetch().await?;
        self.advance(&page);
        Ok(Some(page))
    }

    /// Rewind to offset 0.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.exhausted = false;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PoolConfig;
    use crate::query::TableRegistry;
    use crate::record::FieldValue;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;

    fn seeded(rows: usize) -> (MemoryStore, ConnectionPool<MemoryStore>, Arc<QuerySpec>, TimeRange) {
        let range = TimeRange::parse("2024-01-01", "2024-01-02").unwrap();
        let store = MemoryStore::new();
        store.insert_table(
            "tweets",
            (0..rows)
                .map(|i| {
                    Record::from_pairs([
                        ("tweet_id", FieldValue::Int(i as i64)),
                        (
                            "created_at_ts",
                            FieldValue::Timestamp(range.start() + TimeDelta::seconds(i as i64)),
                        ),
                    ])
                })
                .collect(),
        );
        let pool = ConnectionPool::new(store.clone(), PoolConfig::default()).unwrap();
        let spec = Arc::new(QuerySpec::new(&TableRegistry::builtin(), "tweets").unwrap());
        (store, pool, spec, range)
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let (_store, pool, spec, range) = seeded(2500);
        let mut reader = PageReader::new(pool, spec, range, 1000).unwrap();

        let mut sizes = Vec::new();
        while let Some(page) = reader.next_page().await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(reader.offset(), 2500);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_with_empty_page() {
        let (_store, pool, spec, range) = seeded(2000);
        let mut reader = PageReader::new(pool, spec, range, 1000).unwrap();

        let mut sizes = Vec::new();
        while let Some(page) = reader.next_page().await.unwrap() {
            sizes.push(page.len());
        }
        assert_eq!(sizes, vec![1000, 1000, 0]);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected_before_connecting() {
        let (store, pool, spec, range) = seeded(10);
        assert!(matches!(
            PageReader::new(pool, spec, range, 0),
            Err(FetchError::InvalidConfig(_))
        ));
        assert_eq!(store.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_page_does_not_advance() {
        let (store, pool, spec, range) = seeded(15);
        let mut reader = PageReader::new(pool.clone(), spec, range, 10).unwrap();

        store.fail_next_queries(1);
        assert!(reader.next_page().await.unwrap_err().is_transient());
        assert_eq!(reader.offset(), 0);
        assert_eq!(pool.status().checked_out, 0);

        let page = reader.next_page().await.unwrap().unwrap();
        assert_eq!(page.offset, 0);
        assert_eq!(page.records[0].get("tweet_id"), Some(&FieldValue::Int(0)));
    }

    #[tokio::test]
    async fn test_restart_reads_from_the_beginning() {
        let (_store, pool, spec, range) = seeded(5);
        let mut reader = PageReader::new(pool, spec, range, 10).unwrap();
        reader.next_page().await.unwrap();
        assert!(reader.is_exhausted());
        assert!(reader.next_page().await.unwrap().is_none());

        reader.restart();
        assert_eq!(reader.next_page().await.unwrap().unwrap().len(), 5);
    }
}
