//! Persistence seam for table checkpoints.

use crate::chunk_store::ChunkStore;
use crate::table::Table;
use replaydb_commons::ReplayError;
use std::sync::Arc;

/// Persistence backend for table checkpoints.
///
/// The service delegates all durability to this seam: `Checkpoint` RPCs call
/// `save`, and startup first tries `load_latest` and, when that reports
/// `NotFound`, falls back to `load_fallback` (a checkpoint produced by
/// another experiment). Loaded chunks are registered with the provided
/// `ChunkStore` so that restored items can share payloads.
pub trait Checkpointer: Send + Sync {
    /// Snapshots every table, keeping at most `keep_latest` checkpoints, and
    /// returns the path of the new checkpoint.
    fn save(&self, tables: &[Arc<dyn Table>], keep_latest: usize) -> Result<String, ReplayError>;

    /// Restores the tables of the most recent checkpoint.
    fn load_latest(&self, chunk_store: &ChunkStore) -> Result<Vec<Arc<dyn Table>>, ReplayError>;

    /// Restores the tables of the configured fallback checkpoint.
    fn load_fallback(&self, chunk_store: &ChunkStore) -> Result<Vec<Arc<dyn Table>>, ReplayError>;
}
