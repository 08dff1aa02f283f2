//! Shared fixtures for the stream reactor integration tests.
#![allow(dead_code)]

use bytes::Bytes;
use replaydb_rpc::ReplayServiceImpl;
use replaydb_commons::{ItemKey, ReplayError};
use replaydb_core::{
    Chunk, InsertCallback, SampleBatch, SampleCallback, SampledItem, Table, TableItem,
    TaskExecutor,
};
use replaydb_proto::{
    ChunkData, ChunkSlice, FlatTrajectory, InsertStreamRequest, KeyWithPriority, PrioritizedItem,
    TableInfo,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

/// A scripted table double.
///
/// Insert admissions can be deferred and completed manually in any order;
/// sampling requests either consume a pre-scripted batch or park until the
/// test responds. All completions are dispatched on fresh threads, never
/// inline, matching the executor-delivery contract of the real table.
pub struct MockTable {
    name: String,
    state: Mutex<MockState>,
}

struct MockState {
    defer_inserts: bool,
    inserted_keys: Vec<ItemKey>,
    inserted_items: Vec<Arc<TableItem>>,
    pending_inserts: Vec<(ItemKey, Arc<InsertCallback>)>,
    pending_samples: VecDeque<(i32, Arc<SampleCallback>)>,
    scripted_batches: VecDeque<Result<SampleBatch, ReplayError>>,
    enqueue_count: usize,
    requested_batch_sizes: Vec<i32>,
    last_timeout: Option<Duration>,
    default_flexible_batch_size: i32,
}

impl MockTable {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                defer_inserts: false,
                inserted_keys: Vec::new(),
                inserted_items: Vec::new(),
                pending_inserts: Vec::new(),
                pending_samples: VecDeque::new(),
                scripted_batches: VecDeque::new(),
                enqueue_count: 0,
                requested_batch_sizes: Vec::new(),
                last_timeout: None,
                default_flexible_batch_size: 4,
            }),
        })
    }

    /// A table that queues every insert until the test completes it.
    pub fn deferring(name: &str) -> Arc<Self> {
        let table = Self::new(name);
        table.state.lock().unwrap().defer_inserts = true;
        table
    }

    /// Keys handed to `insert_or_assign_async`, in arrival order.
    pub fn inserted_keys(&self) -> Vec<ItemKey> {
        self.state.lock().unwrap().inserted_keys.clone()
    }

    /// Items captured from immediate admissions.
    pub fn inserted_items(&self) -> Vec<Arc<TableItem>> {
        self.state.lock().unwrap().inserted_items.clone()
    }

    pub fn pending_insert_count(&self) -> usize {
        self.state.lock().unwrap().pending_inserts.len()
    }

    /// Completes the deferred admission of `key`, firing its callback on a
    /// fresh thread. Panics if the key is not pending.
    pub fn complete_insert(&self, key: ItemKey) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            let index = state
                .pending_inserts
                .iter()
                .position(|(pending, _)| *pending == key)
                .unwrap_or_else(|| panic!("no pending insert for key {}", key));
            state.pending_inserts.remove(index).1
        };
        std::thread::spawn(move || (*callback)(key));
    }

    /// Completes all deferred admissions in arrival order.
    pub fn complete_all_inserts(&self) {
        let pending: Vec<(ItemKey, Arc<InsertCallback>)> =
            std::mem::take(&mut self.state.lock().unwrap().pending_inserts);
        std::thread::spawn(move || {
            for (key, callback) in pending {
                (*callback)(key);
            }
        });
    }

    /// Number of sampling requests enqueued so far.
    pub fn enqueue_count(&self) -> usize {
        self.state.lock().unwrap().enqueue_count
    }

    /// Batch sizes requested so far, in arrival order.
    pub fn requested_batch_sizes(&self) -> Vec<i32> {
        self.state.lock().unwrap().requested_batch_sizes.clone()
    }

    /// Batch size of the oldest parked sampling request, if any.
    pub fn parked_batch_size(&self) -> Option<i32> {
        self.state
            .lock()
            .unwrap()
            .pending_samples
            .front()
            .map(|(size, _)| *size)
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        self.state.lock().unwrap().last_timeout
    }

    /// Scripts the response for a future sampling request.
    pub fn push_batch(&self, batch: Result<SampleBatch, ReplayError>) {
        self.state.lock().unwrap().scripted_batches.push_back(batch);
    }

    /// Responds to the oldest parked sampling request.
    pub fn respond_parked(&self, batch: Result<SampleBatch, ReplayError>) {
        let (_, callback) = self
            .state
            .lock()
            .unwrap()
            .pending_samples
            .pop_front()
            .expect("no parked sampling request");
        std::thread::spawn(move || (*callback)(batch));
    }
}

impl Table for MockTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_or_assign_async(
        &self,
        item: TableItem,
        can_insert: &mut bool,
        insert_completed: Arc<InsertCallback>,
    ) -> Result<(), ReplayError> {
        let key = item.key();
        let mut state = self.state.lock().unwrap();
        state.inserted_keys.push(key);
        state.inserted_items.push(Arc::new(item));
        if state.defer_inserts {
            state.pending_inserts.push((key, insert_completed));
            *can_insert = false;
        } else {
            *can_insert = true;
            std::thread::spawn(move || (*insert_completed)(key));
        }
        Ok(())
    }

    fn enqueue_sample_request(
        &self,
        batch_size: i32,
        sampling_done: Arc<SampleCallback>,
        timeout: Option<Duration>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.enqueue_count += 1;
        state.requested_batch_sizes.push(batch_size);
        state.last_timeout = timeout;
        match state.scripted_batches.pop_front() {
            Some(batch) => {
                std::thread::spawn(move || (*sampling_done)(batch));
            }
            None => {
                state.pending_samples.push_back((batch_size, sampling_done));
            }
        }
    }

    fn mutate_items(
        &self,
        _updates: &[KeyWithPriority],
        _delete_keys: &[ItemKey],
    ) -> Result<(), ReplayError> {
        Ok(())
    }

    fn reset(&self) -> Result<(), ReplayError> {
        Ok(())
    }

    fn close(&self) {}

    fn info(&self) -> TableInfo {
        TableInfo {
            name: self.name.clone(),
            sampler: "mock".to_string(),
            ..Default::default()
        }
    }

    fn default_flexible_batch_size(&self) -> i32 {
        self.state.lock().unwrap().default_flexible_batch_size
    }

    fn set_callback_executor(&self, _executor: Arc<TaskExecutor>) {}
}

/// Builds a chunk message with a payload of `size` bytes.
pub fn chunk_data(key: u64, size: usize) -> ChunkData {
    ChunkData {
        chunk_key: key,
        data: Bytes::from(vec![key as u8; size]),
    }
}

/// Builds an item whose flat trajectory covers `chunk_keys` in order.
pub fn prioritized_item(key: u64, table: &str, chunk_keys: &[u64]) -> PrioritizedItem {
    PrioritizedItem {
        key,
        table: table.to_string(),
        priority: 1.0,
        flat_trajectory: Some(FlatTrajectory {
            slices: chunk_keys
                .iter()
                .map(|chunk_key| ChunkSlice {
                    chunk_key: *chunk_key,
                    offset: 0,
                    length: 1,
                })
                .collect(),
        }),
        inserted_at_ms: 0,
        times_sampled: 0,
    }
}

/// Builds an insert request.
pub fn insert_request(
    chunks: Vec<ChunkData>,
    items: Vec<PrioritizedItem>,
    keep_chunk_keys: Vec<u64>,
) -> InsertStreamRequest {
    InsertStreamRequest {
        chunks,
        items,
        keep_chunk_keys,
    }
}

/// Builds a sampled item backed by chunks of the given payload sizes.
pub fn sampled_item(key: u64, table: &str, chunk_sizes: &[usize]) -> SampledItem {
    let chunk_keys: Vec<u64> = chunk_sizes
        .iter()
        .enumerate()
        .map(|(index, _)| key * 100 + index as u64)
        .collect();
    let chunks: Vec<Arc<Chunk>> = chunk_keys
        .iter()
        .zip(chunk_sizes)
        .map(|(chunk_key, size)| Arc::new(Chunk::new(chunk_data(*chunk_key, *size))))
        .collect();
    SampledItem {
        item: Arc::new(TableItem {
            item: prioritized_item(key, table, &chunk_keys),
            chunks,
        }),
        priority: 1.0,
        times_sampled: 1,
        probability: 0.25,
        table_size: 7,
    }
}

/// Wraps sampled items as a successful batch.
pub fn batch(samples: Vec<SampledItem>) -> Result<SampleBatch, ReplayError> {
    Ok(SampleBatch {
        samples,
        rate_limited: false,
    })
}

/// Builds a service whose registry holds the given tables.
pub fn service_with(tables: Vec<Arc<dyn Table>>) -> ReplayServiceImpl {
    ReplayServiceImpl::new(tables, None, 2).expect("service init")
}

/// A channel-backed request stream: the sender side plays the client.
pub fn request_stream<T: Send + 'static>(
) -> (mpsc::Sender<Result<T, Status>>, ReceiverStream<Result<T, Status>>) {
    let (tx, rx) = mpsc::channel(16);
    (tx, ReceiverStream::new(rx))
}

/// Collects stream output until the server closes it, with a timeout per
/// message. Returns the successful messages and the terminal status error,
/// if any.
pub async fn collect_responses<T>(
    rx: &mut mpsc::Receiver<Result<T, Status>>,
) -> (Vec<T>, Option<Status>) {
    let mut messages = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Ok(message))) => messages.push(message),
            Ok(Some(Err(status))) => return (messages, Some(status)),
            Ok(None) => return (messages, None),
            Err(_) => panic!("timed out waiting for stream output"),
        }
    }
}
