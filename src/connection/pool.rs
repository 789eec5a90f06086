//! Bounded connection pool
//!
//! At most `max_size` connections are checked out at once; a semaphore
//! permit travels with every [`PooledConnection`]. Connections go back to
//! the idle queue when the guard drops, unless a transient error marked
//! them broken, a query was interrupted mid-flight, or the pool was closed
//! in the meantime. Those are discarded instead.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{Connection, ConnectionFactory, PageRequest};
use crate::config::Config;
use crate::error::{ConnectionError, FetchError, Result};
use crate::query::{QuerySpec, TimeRange};
use crate::record::Record;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once
    pub max_size: usize,

    /// How long `acquire` waits for a free slot; `None` waits forever
    pub acquire_timeout: Option<Duration>,

    /// Probe idle connections with [`Connection::is_valid`] before reuse
    pub validate_on_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 3,
            acquire_timeout: Some(Duration::from_secs(300)),
            validate_on_acquire: false,
        }
    }
}

impl PoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_size: config.fetch.max_connections,
            acquire_timeout: config.acquire_timeout(),
            validate_on_acquire: config.fetch.validate_on_acquire,
        }
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    /// Connections currently open, idle or checked out
    pub open: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub closed: bool,
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    idle: Mutex<VecDeque<F::Connection>>,
    semaphore: Arc<Semaphore>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> Shared<F> {
    fn pop_idle(&self) -> Option<F::Connection> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Return a healthy connection to the idle queue. The closed flag is
    /// checked under the queue lock so `close_all` cannot miss it.
    fn push_idle(&self, conn: F::Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            drop(idle);
            self.discard(conn);
        } else {
            idle.push_back(conn);
        }
    }

    fn discard(&self, conn: F::Connection) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        drop(conn);
    }
}

/// Bounded pool of store connections. Cloning shares the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool; no connection is opened until first use or
    /// [`warm_up`](Self::warm_up).
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        if config.max_size == 0 {
            return Err(FetchError::invalid_config(
                "max_connections must be at least 1",
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                factory,
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                config,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Borrow a connection, waiting for a free slot if all are in use.
    ///
    /// # Returns
    /// * `Result<PooledConnection<F>>` - Guard that returns the connection on drop
    ///
    /// # Errors
    /// * `PoolExhausted` when no slot frees up within the acquire timeout
    /// * `PoolClosed` after [`close_all`](Self::close_all)
    /// * Any error from opening a new connection
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        if self.is_closed() {
            return Err(ConnectionError::PoolClosed.into());
        }

        let semaphore = Arc::clone(&self.shared.semaphore);
        let acquired = match self.shared.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, semaphore.acquire_owned())
                .await
                .map_err(|_| ConnectionError::PoolExhausted {
                    max_size: self.shared.config.max_size,
                    waited: limit,
                })?,
            None => semaphore.acquire_owned().await,
        };
        let permit = acquired.map_err(|_| ConnectionError::PoolClosed)?;

        while let Some(mut conn) = self.shared.pop_idle() {
            if self.shared.config.validate_on_acquire && !conn.is_valid().await {
                debug!("Discarding stale idle connection");
                self.shared.discard(conn);
                continue;
            }
            return Ok(PooledConnection::new(conn, permit, Arc::clone(&self.shared)));
        }

        let conn = self.shared.factory.connect().await?;
        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(open, max = self.shared.config.max_size, "Opened connection");
        Ok(PooledConnection::new(conn, permit, Arc::clone(&self.shared)))
    }

    /// Open connections until `target` are open (capped at `max_size`).
    pub async fn warm_up(&self, target: usize) -> Result<()> {
        let target = target.min(self.shared.config.max_size);
        while !self.is_closed() && self.shared.open.load(Ordering::SeqCst) < target {
            let conn = self.shared.factory.connect().await?;
            self.shared.open.fetch_add(1, Ordering::SeqCst);
            self.shared.push_idle(conn);
        }
        debug!(open = self.shared.open.load(Ordering::SeqCst), "Pool warmed up");
        Ok(())
    }

    /// Close the pool. Idle connections are dropped now; checked-out ones
    /// are dropped when their guards go away. Calling twice is a no-op.
    pub fn close_all(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.semaphore.close();
        let drained: Vec<F::Connection> = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = drained.len();
        for conn in drained {
            self.shared.discard(conn);
        }
        info!(closed_idle = count, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn max_size(&self) -> usize {
        self.shared.config.max_size
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let open = self.shared.open.load(Ordering::SeqCst);
        PoolStatus {
            max_size: self.shared.config.max_size,
            open,
            idle,
            checked_out: open.saturating_sub(idle),
            closed: self.is_closed(),
        }
    }
}

/// A connection on loan from the pool.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    shared: Arc<Shared<F>>,
    _permit: OwnedSemaphorePermit,
    broken: bool,
    in_flight: bool,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(conn: F::Connection, permit: OwnedSemaphorePermit, shared: Arc<Shared<F>>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            _permit: permit,
            broken: false,
            in_flight: false,
        }
    }

    pub async fn fetch_page(&mut self, request: &PageRequest<'_>) -> Result<Vec<Record>> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(ConnectionError::PoolClosed)?;
        self.in_flight = true;
        let result = conn.fetch_page(request).await;
        self.in_flight = false;
        self.note(&result);
        result
    }

    pub async fn fetch_count(&mut self, spec: &QuerySpec, range: &TimeRange) -> Result<u64> {
        let conn = self
            .conn
            .as_mut()
            .ok_or(ConnectionError::PoolClosed)?;
        self.in_flight = true;
        let result = conn.fetch_count(spec, range).await;
        self.in_flight = false;
        self.note(&result);
        result
    }

    /// Do not return this connection to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Give the connection back now instead of at end of scope.
    pub fn release(self) {}

    fn note<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_transient() {
                warn!(error = %e, "Discarding connection after transient error");
                self.broken = true;
            }
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || self.in_flight {
            self.shared.discard(conn);
        } else {
            self.shared.push_idle(conn);
        }
    }
}
