//! In-memory backend
//!
//! Rows live in a shared map keyed by table name. Filter predicates cannot
//! be parsed here, so callers register named predicates and the query's
//! filter text selects one by exact match. Used by tests and by library
//! users that want to drive the fetch pipeline without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::connection::{Connection, ConnectionFactory, PageRequest};
use crate::error::{ConnectionError, FetchError, Result};
use crate::query::{QuerySpec, TimeRange};
use crate::record::{FieldValue, Record};

type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

#[derive(Default)]
struct Inner {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    predicates: RwLock<HashMap<String, Predicate>>,
    connects: AtomicUsize,
    queries: AtomicUsize,
    fail_queries: AtomicUsize,
    fail_connects: AtomicUsize,
    generation: AtomicUsize,
}

/// Shared in-memory table store. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table.
    pub fn insert_table(&self, table: &str, rows: Vec<Record>) {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), rows);
    }

    /// Append rows to a table, creating it if needed.
    pub fn append(&self, table: &str, rows: impl IntoIterator<Item = Record>) {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Register a predicate selected by a query filter equal to `name`.
    pub fn register_filter<P>(&self, name: &str, predicate: P)
    where
        P: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.inner
            .predicates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(predicate));
    }

    /// Make the next `n` page or count queries fail with a transient error.
    pub fn fail_next_queries(&self, n: usize) {
        self.inner.fail_queries.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Mark every connection opened so far as stale.
    pub fn invalidate_connections(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of page and count queries issued, failed ones included.
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Rows of `spec` inside `range` passing the filter, in ordering-key order.
    fn select(&self, spec: &QuerySpec, range: &TimeRange) -> Result<Vec<Record>> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.inner.fail_queries) {
            return Err(ConnectionError::QueryFailed("injected failure".to_string()).into());
        }

        let predicate = match spec.filter() {
            Some(filter) => Some(
                self.inner
                    .predicates
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(filter)
                    .cloned()
                    .ok_or_else(|| {
                        FetchError::invalid_config(format!("unsupported filter: {filter}"))
                    })?,
            ),
            None => None,
        };

        let tables = self
            .inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get(spec.table())
            .ok_or_else(|| FetchError::UnknownTable(spec.table().to_string()))?;

        let mut selected = Vec::new();
        for row in rows {
            let in_range = match row.get(spec.time_field()) {
                Some(FieldValue::Timestamp(ts)) => range.contains(ts),
                Some(FieldValue::Null) | None => false,
                Some(_) => {
                    return Err(FetchError::SchemaMismatch(format!(
                        "time field '{}' is not a timestamp",
                        spec.time_field()
                    )));
                }
            };
            if in_range && predicate.as_ref().is_none_or(|p| p(row)) {
                selected.push(row.clone());
            }
        }
        drop(tables);

        let order_by = spec.order_by();
        selected.sort_by(|a, b| {
            order_by
                .iter()
                .map(|field| {
                    let left = a.get(field).unwrap_or(&FieldValue::Null);
                    let right = b.get(field).unwrap_or(&FieldValue::Null);
                    left.sort_cmp(right)
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(selected)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryStore {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        if Self::take_failure(&self.inner.fail_connects) {
            return Err(ConnectionError::ConnectFailed("injected failure".to_string()).into());
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: self.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
        })
    }
}

/// Connection handle onto a [`MemoryStore`].
pub struct MemoryConnection {
    store: MemoryStore,
    generation: usize,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Record>> {
        let rows = self.store.select(request.spec, &request.range)?;
        let page = rows.into_iter().skip(request.offset).take(request.limit);

        match request.spec.fields() {
            Some(fields) => {
                let columns: Arc<[String]> = fields.to_vec().into();
                page.map(|row| {
                    row.project(&columns).map_err(|missing| {
                        FetchError::SchemaMismatch(format!(
                            "field '{missing}' not found in table '{}'",
                            request.spec.table()
                        ))
                    })
                })
                .collect()
            }
            None => Ok(page.collect()),
        }
    }

    async fn fetch_count(&mut self, spec: &QuerySpec, range: &TimeRange) -> Result<u64> {
        Ok(self.store.select(spec, range)?.len() as u64)
    }

    async fn is_valid(&mut self) -> bool {
        self.generation == self.store.inner.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TableRegistry;
    use chrono::{TimeZone, Utc};

    fn tweet(id: i64, minute: u32) -> Record {
        Record::from_pairs([
            ("tweet_id", FieldValue::Int(id)),
            (
                "created_at_ts",
                FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()),
            ),
            ("lang", FieldValue::from(if id % 2 == 0 { "en" } else { "fr" })),
        ])
    }

    fn setup() -> (MemoryStore, QuerySpec, TimeRange) {
        let store = MemoryStore::new();
        store.insert_table("tweets", vec![tweet(3, 5), tweet(1, 5), tweet(2, 0), tweet(4, 59)]);
        let spec = QuerySpec::new(&TableRegistry::builtin(), "tweets").unwrap();
        let range = TimeRange::parse("2024-01-01 00:00:00", "2024-01-01 00:30:00").unwrap();
        (store, spec, range)
    }

    #[tokio::test]
    async fn test_page_is_sorted_filtered_and_sliced() {
        let (store, spec, range) = setup();
        let mut conn = store.connect().await.unwrap();

        let page = conn
            .fetch_page(&PageRequest::new(&spec, range, 10, 0))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.get("tweet_id").cloned()).collect();
        assert_eq!(
            ids,
            vec![
                Some(FieldValue::Int(2)),
                Some(FieldValue::Int(1)),
                Some(FieldValue::Int(3))
            ]
        );

        let page = conn
            .fetch_page(&PageRequest::new(&spec, range, 1, 1))
            .await
            .unwrap();
        assert_eq!(page[0].get("tweet_id"), Some(&FieldValue::Int(1)));
        assert_eq!(conn.fetch_count(&spec, &range).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_named_filter_and_projection() {
        let (store, spec, range) = setup();
        store.register_filter("lang = 'en'", |r| {
            r.get("lang") == Some(&FieldValue::from("en"))
        });
        let spec = spec
            .with_filter(Some("lang = 'en'"))
            .with_fields(Some(vec!["tweet_id".to_string()]))
            .unwrap();
        let mut conn = store.connect().await.unwrap();

        let page = conn
            .fetch_page(&PageRequest::new(&spec, range, 10, 0))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].columns(), &["tweet_id".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_field_and_unknown_table() {
        let (store, spec, range) = setup();
        let mut conn = store.connect().await.unwrap();

        let bad_fields = spec
            .clone()
            .with_fields(Some(vec!["nope".to_string()]))
            .unwrap();
        let err = conn
            .fetch_page(&PageRequest::new(&bad_fields, range, 10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SchemaMismatch(_)));

        let users = QuerySpec::new(&TableRegistry::builtin(), "users").unwrap();
        let err = conn.fetch_count(&users, &range).await.unwrap_err();
        assert!(matches!(err, FetchError::UnknownTable(_)));

        let unknown_filter = spec.with_filter(Some("x > 1"));
        let err = conn.fetch_count(&unknown_filter, &range).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (store, spec, range) = setup();
        store.fail_next_connects(1);
        assert!(store.connect().await.is_err());

        let mut conn = store.connect().await.unwrap();
        store.fail_next_queries(1);
        assert!(conn.fetch_count(&spec, &range).await.unwrap_err().is_transient());
        assert!(conn.fetch_count(&spec, &range).await.is_ok());
        assert_eq!(store.query_count(), 2);
    }
}
