//! Chunk sources for export operations
//!
//! The export coordinator pulls chunks through [`ChunkSource`] so it does
//! not depend on the connection factory type of the stream feeding it.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::connection::ConnectionFactory;
use crate::error::Result;
use crate::fetch::{Chunk, ChunkStream};

/// Trait for pulling chunks one at a time
#[async_trait]
pub trait ChunkSource: Send {
    /// Fetch the next chunk
    ///
    /// # Returns
    /// * `Result<Option<Chunk>>` - Next chunk, or None if exhausted
    async fn next_chunk(&mut self) -> Result<Option<Chunk>>;

    /// Stop the source and release what it holds
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<F: ConnectionFactory> ChunkSource for ChunkStream<F> {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        ChunkStream::next_chunk(self).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.is_finished() {
            debug!(
                "Chunk stream for {} already exhausted",
                self.spec().table()
            );
        } else {
            info!(
                "Closed chunk stream for {} after {} records ({} chunks)",
                self.spec().table(),
                self.total_records(),
                self.chunks_yielded()
            );
        }
        Ok(())
    }
}
