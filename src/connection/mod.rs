//! Connection management for the time-series store
//!
//! This module provides:
//! - The [`Connection`] and [`ConnectionFactory`] traits implemented by each
//!   store backend
//! - A bounded [`ConnectionPool`] handing out RAII [`PooledConnection`]s
//!
//! The pool never knows which backend it is pooling. Backends live in
//! [`crate::store`].

pub mod pool;

pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};

use async_trait::async_trait;

use crate::error::Result;
use crate::query::{QuerySpec, TimeRange};
use crate::record::Record;

/// One page query: rows of `spec` inside `range`, sorted by the ordering
/// key, skipping `offset` rows and returning at most `limit`.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub spec: &'a QuerySpec,
    pub range: TimeRange,
    pub limit: usize,
    pub offset: usize,
}

impl<'a> PageRequest<'a> {
    pub fn new(spec: &'a QuerySpec, range: TimeRange, limit: usize, offset: usize) -> Self {
        Self {
            spec,
            range,
            limit,
            offset,
        }
    }
}

/// A single open session to the store.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute one page query.
    ///
    /// # Arguments
    /// * `request` - Table, range, filter, projection and paging window
    ///
    /// # Returns
    /// * `Result<Vec<Record>>` - At most `request.limit` rows in ordering-key order
    async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Record>>;

    /// Count the rows of `spec` inside `range`, honouring the filter.
    async fn fetch_count(&mut self, spec: &QuerySpec, range: &TimeRange) -> Result<u64>;

    /// Cheap liveness check used before reusing an idle connection.
    async fn is_valid(&mut self) -> bool;
}

/// Opens new [`Connection`]s for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a fresh connection.
    async fn connect(&self) -> Result<Self::Connection>;
}
