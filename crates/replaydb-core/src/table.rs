//! The priority-table interface driven by the RPC layer.

use crate::item::TableItem;
use crate::task_executor::TaskExecutor;
use replaydb_commons::{ItemKey, ReplayError};
use replaydb_proto::{KeyWithPriority, TableInfo};
use std::sync::Arc;
use std::time::Duration;

/// Callback fired on the callback executor when an item's admission
/// completes. Receives the admitted item key.
pub type InsertCallback = dyn Fn(ItemKey) + Send + Sync;

/// Callback fired on the callback executor when a sampling request
/// completes or fails.
pub type SampleCallback = dyn Fn(Result<SampleBatch, ReplayError>) + Send + Sync;

/// One item drawn from a table.
#[derive(Clone)]
pub struct SampledItem {
    /// Shared reference to the stored item. Holders keep the item's chunks
    /// alive until the reference is dropped.
    pub item: Arc<TableItem>,
    /// Priority at sampling time.
    pub priority: f64,
    /// Times the item had been sampled, including this draw.
    pub times_sampled: i32,
    /// Probability with which the item was selected.
    pub probability: f64,
    /// Number of items in the table at sampling time.
    pub table_size: i64,
}

/// The result of one sampling request.
pub struct SampleBatch {
    pub samples: Vec<SampledItem>,
    /// True if the request had to wait on the rate limiter before being
    /// served.
    pub rate_limited: bool,
}

/// A named priority buffer of items.
///
/// Implementations must be non-blocking in `insert_or_assign_async` and
/// `enqueue_sample_request`: both are invoked while the caller holds a
/// reactor mutex and may only enqueue work. Completions are delivered on the
/// attached callback executor.
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    /// Inserts an item, or updates the priority of an existing item with the
    /// same key.
    ///
    /// Sets `can_insert` to true when the caller may continue submitting
    /// inserts immediately, false when the table's admission buffer is
    /// saturated and the caller should pause until `insert_completed` fires.
    /// The callback fires exactly once per call, with the item key, when
    /// admission completes.
    fn insert_or_assign_async(
        &self,
        item: TableItem,
        can_insert: &mut bool,
        insert_completed: Arc<InsertCallback>,
    ) -> Result<(), ReplayError>;

    /// Enqueues a sampling request for up to `batch_size` items. The
    /// callback receives the batch, or `DeadlineExceeded` when `timeout`
    /// elapses before the rate limiter admits the request.
    fn enqueue_sample_request(
        &self,
        batch_size: i32,
        sampling_done: Arc<SampleCallback>,
        timeout: Option<Duration>,
    );

    /// Applies priority updates and deletions. Updates for unknown keys are
    /// ignored; deletions of unknown keys are ignored.
    fn mutate_items(
        &self,
        updates: &[KeyWithPriority],
        delete_keys: &[ItemKey],
    ) -> Result<(), ReplayError>;

    /// Removes every item and resets rate-limiter accounting.
    fn reset(&self) -> Result<(), ReplayError>;

    /// Cancels pending work and stops the table worker. Idempotent.
    fn close(&self);

    fn info(&self) -> TableInfo;

    /// Batch size substituted for the auto-select sentinel.
    fn default_flexible_batch_size(&self) -> i32;

    /// Attaches the shared executor on which completions are delivered.
    fn set_callback_executor(&self, executor: Arc<TaskExecutor>);
}
