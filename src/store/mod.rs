//! Store backends
//!
//! - [`postgres`]: PostgreSQL over tokio-postgres
//! - [`memory`]: shared in-memory tables for tests and embedding
//! - [`sql`]: SQL text generation shared by SQL backends

pub mod memory;
pub mod postgres;
pub mod sql;

pub use memory::{MemoryConnection, MemoryStore};
pub use postgres::{PgConnection, PgConnectionFactory};
