//! # replaydb-core
//!
//! Storage primitives and collaborators of the replay service:
//!
//! - **Chunk / ChunkStore**: immutable tensor payloads shared between items,
//!   with a weak-reference deduplicating registry.
//! - **TableItem**: a trajectory descriptor plus the strong chunk references
//!   that keep its payload alive.
//! - **Table**: the priority-buffer interface the RPC layer drives, and
//!   `PriorityTable`, the in-memory implementation with weighted sampling
//!   and rate-limited admission.
//! - **TaskExecutor**: the shared thread pool on which tables deliver insert
//!   and sampling completions.
//! - **Checkpointer**: the persistence seam used by the `Checkpoint` RPC and
//!   service startup.

pub mod checkpoint;
pub mod chunk;
pub mod chunk_store;
pub mod item;
pub mod priority_table;
pub mod rate_limiter;
pub mod selector;
pub mod table;
pub mod task_executor;

// Re-export commonly used types
pub use checkpoint::Checkpointer;
pub use chunk::Chunk;
pub use chunk_store::ChunkStore;
pub use item::{trajectory_chunk_keys, TableItem};
pub use priority_table::PriorityTable;
pub use rate_limiter::RateLimiter;
pub use selector::Selector;
pub use table::{InsertCallback, SampleBatch, SampleCallback, SampledItem, Table};
pub use task_executor::TaskExecutor;
