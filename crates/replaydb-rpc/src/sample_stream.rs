//! Sample stream reactor.
//!
//! Clients request batches of samples over a bidirectional stream. The
//! server pulls flexible-size batches from the table, packs them into
//! size-bounded responses, and stops pulling while too many responses are
//! waiting on the client; write completions re-arm sampling.

use crate::reactor::{CallbackCell, ReactorCore, ReactorState, ResponseCtx};
use crate::service_impl::ReplayServiceImpl;
use crate::status::{table_not_found, to_status};
use replaydb_commons::ReplayError;
use replaydb_core::{SampleBatch, SampleCallback, SampledItem, Table, TableItem};
use replaydb_proto::{
    PrioritizedItem, SampleEntry, SampleInfo, SampleStreamRequest, SampleStreamResponse,
    AUTO_SELECT_BATCH_SIZE,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Maximum queued sample responses awaiting transmission. When the limit is
/// reached, the reactor stops enqueuing sampling requests on the table until
/// the client drains a write; this caps the reactor's memory usage.
pub const MAX_QUEUED_SAMPLE_RESPONSES: usize = 3;

/// Maximum bytes of chunk payload per response. Items larger than this span
/// multiple responses; a single chunk above the cap travels alone.
pub const MAX_SAMPLE_RESPONSE_SIZE_BYTES: usize = 1024 * 1024;

#[derive(Default)]
struct SampleResponseCtx {
    payload: SampleStreamResponse,
    /// Sampled items pinned until this response reaches the transport, so
    /// that shared chunk payloads outlive the message carrying them.
    items: Vec<Arc<TableItem>>,
}

impl ResponseCtx for SampleResponseCtx {
    type Message = SampleStreamResponse;

    fn message(&self) -> &SampleStreamResponse {
        &self.payload
    }
}

/// Context of the sampling task currently being served.
#[derive(Default)]
struct SampleTaskInfo {
    table: Option<Arc<dyn Table>>,
    requested_samples: i64,
    fetched_samples: i64,
    flexible_batch_size: i32,
    timeout: Option<Duration>,
}

impl SampleTaskInfo {
    /// Size of the next batch to fetch from the table; zero once the task
    /// is complete.
    fn next_sample_size(&self) -> i32 {
        let remaining = self.requested_samples - self.fetched_samples;
        if remaining <= 0 {
            0
        } else {
            remaining.min(self.flexible_batch_size as i64) as i32
        }
    }
}

#[derive(Default)]
struct SampleExt {
    task: SampleTaskInfo,
    /// Chunk bytes accumulated in the response currently being built.
    current_response_size_bytes: usize,
    /// True while a sampling request is enqueued on the table.
    waiting_for_enqueued_sample: bool,
    /// Weak handle to the sampling callback, used to re-arm sampling from
    /// within the callback itself.
    sampling_done: Option<Weak<SampleCallback>>,
}

type SampleCore = ReactorCore<SampleResponseCtx, SampleExt>;

/// Drives one sample stream to completion.
pub async fn run_sample_stream<S>(
    service: ReplayServiceImpl,
    mut requests: S,
    tx: mpsc::Sender<Result<SampleStreamResponse, Status>>,
) where
    S: Stream<Item = Result<SampleStreamRequest, Status>> + Unpin + Send,
{
    let core: Arc<SampleCore> = ReactorCore::new(SampleExt::default());

    let callback: Arc<SampleCallback> = {
        let core = Arc::clone(&core);
        Arc::new(move |result: Result<SampleBatch, ReplayError>| on_sampling_done(&core, result))
    };
    core.state.lock().ext.sampling_done = Some(Arc::downgrade(&callback));
    let sampling_done: CallbackCell<SampleCallback> = CallbackCell::new(callback);

    let writer = tokio::spawn(Arc::clone(&core).write_loop(tx, {
        let handle = sampling_done.handle();
        move |core, state| {
            // A drained write frees queue space; sampling may resume.
            maybe_start_sampling(state, &handle);
            maybe_finish(core, state);
        }
    }));

    while core.read_permit().await {
        match requests.next().await {
            Some(Ok(request)) => {
                let result = {
                    let mut state = core.state.lock();
                    process_incoming_request(&service, &mut state, request, &sampling_done.handle())
                };
                if let Err(status) = result {
                    core.set_finished(status);
                    break;
                }
            }
            Some(Err(status)) => {
                core.set_finished(status);
                break;
            }
            None => {
                let mut state = core.state.lock();
                state.read_in_flight = false;
                state.reads_done = true;
                maybe_finish(&core, &mut state);
                break;
            }
        }
    }

    let _ = writer.await;
    // Callbacks capture reactor state; teardown must outwait them.
    sampling_done.drain().await;
}

fn process_incoming_request(
    service: &ReplayServiceImpl,
    state: &mut ReactorState<SampleResponseCtx, SampleExt>,
    request: SampleStreamRequest,
    sampling_done: &Arc<SampleCallback>,
) -> Result<(), Status> {
    state.read_in_flight = false;
    if request.num_samples <= 0 {
        return Err(Status::invalid_argument(format!(
            "`num_samples` must be > 0 (got {})",
            request.num_samples
        )));
    }
    if request.flexible_batch_size <= 0 && request.flexible_batch_size != AUTO_SELECT_BATCH_SIZE {
        return Err(Status::invalid_argument(format!(
            "`flexible_batch_size` must be > 0 or {} for auto-selection (got {})",
            AUTO_SELECT_BATCH_SIZE, request.flexible_batch_size
        )));
    }
    let timeout = match request.rate_limiter_timeout_ms {
        Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
        _ => None,
    };
    let table = match service.table_by_name(&request.table) {
        Some(table) => table,
        None => return Err(table_not_found(&request.table)),
    };
    let flexible_batch_size = if request.flexible_batch_size == AUTO_SELECT_BATCH_SIZE {
        table.default_flexible_batch_size()
    } else {
        request.flexible_batch_size
    };
    state.ext.task = SampleTaskInfo {
        table: Some(table),
        requested_samples: request.num_samples,
        fetched_samples: 0,
        flexible_batch_size,
        timeout,
    };
    maybe_start_sampling(state, sampling_done);
    Ok(())
}

/// Enqueues the next sampling request unless the task is complete, a
/// request is already in flight, or the response queue is full (the outward
/// back-pressure gate).
fn maybe_start_sampling(
    state: &mut ReactorState<SampleResponseCtx, SampleExt>,
    sampling_done: &Arc<SampleCallback>,
) {
    let next_batch_size = state.ext.task.next_sample_size();
    if next_batch_size == 0 {
        return;
    }
    if state.ext.waiting_for_enqueued_sample {
        return;
    }
    if state.responses_to_send.len() >= MAX_QUEUED_SAMPLE_RESPONSES {
        return;
    }
    let table = match &state.ext.task.table {
        Some(table) => Arc::clone(table),
        None => return,
    };
    state.ext.waiting_for_enqueued_sample = true;
    let timeout = state.ext.task.timeout;
    table.enqueue_sample_request(next_batch_size, Arc::clone(sampling_done), timeout);
}

fn on_sampling_done(core: &SampleCore, result: Result<SampleBatch, ReplayError>) {
    let mut state = core.state.lock();
    state.ext.waiting_for_enqueued_sample = false;
    match result {
        Err(err) => {
            if !state.is_finished {
                core.set_finished_locked(&mut state, to_status(err));
            }
        }
        Ok(batch) => {
            if state.is_finished {
                return;
            }
            state.ext.task.fetched_samples += batch.samples.len() as i64;
            let already_writing = !state.responses_to_send.is_empty();
            for sampled in &batch.samples {
                process_sample(&mut state, sampled, batch.rate_limited, already_writing);
            }
            if !already_writing {
                core.maybe_send_next_response_locked(&mut state);
            }
            if state.ext.task.next_sample_size() != 0 {
                let callback = state.ext.sampling_done.clone().and_then(|weak| weak.upgrade());
                if let Some(callback) = callback {
                    maybe_start_sampling(&mut state, &callback);
                }
                return;
            }
            // Current request finalized; ask for another one.
            core.maybe_start_read_locked(&mut state);
            maybe_finish(core, &mut state);
        }
    }
}

/// Packs one sampled item into the response queue, one chunk per entry,
/// splitting responses at the size cap.
fn process_sample(
    state: &mut ReactorState<SampleResponseCtx, SampleExt>,
    sampled: &SampledItem,
    rate_limited: bool,
    write_in_flight: bool,
) {
    if state.responses_to_send.is_empty()
        || (state.responses_to_send.len() == 1 && write_in_flight)
        || state.ext.current_response_size_bytes > MAX_SAMPLE_RESPONSE_SIZE_BYTES
    {
        state.responses_to_send.push_back(SampleResponseCtx::default());
        state.ext.current_response_size_bytes = 0;
    }
    let num_chunks = sampled.item.chunks.len();
    if num_chunks == 0 {
        // Degenerate trajectory: the item is described by its info alone.
        if let Some(tail) = state.responses_to_send.back_mut() {
            tail.payload.entries.push(SampleEntry {
                info: Some(sample_info(sampled, rate_limited)),
                data: None,
                end_of_sequence: true,
            });
            tail.items.push(Arc::clone(&sampled.item));
        }
        return;
    }
    for (index, chunk) in sampled.item.chunks.iter().enumerate() {
        let chunk_size = chunk.encoded_byte_size();
        // Seal the current response rather than letting this chunk push it
        // past the cap; a single oversized chunk still travels alone.
        if state.ext.current_response_size_bytes > 0
            && state.ext.current_response_size_bytes + chunk_size > MAX_SAMPLE_RESPONSE_SIZE_BYTES
        {
            state.responses_to_send.push_back(SampleResponseCtx::default());
            state.ext.current_response_size_bytes = 0;
        }
        let mut entry = SampleEntry {
            info: None,
            data: Some(chunk.data().clone()),
            end_of_sequence: index + 1 == num_chunks,
        };
        if index == 0 {
            entry.info = Some(sample_info(sampled, rate_limited));
        }
        state.ext.current_response_size_bytes += chunk_size;
        if let Some(tail) = state.responses_to_send.back_mut() {
            tail.payload.entries.push(entry);
        }
    }
    // Pin the item to the last response carrying any of its chunks so the
    // shared payload survives until that message has been transmitted.
    if let Some(tail) = state.responses_to_send.back_mut() {
        tail.items.push(Arc::clone(&sampled.item));
    }
}

fn sample_info(sampled: &SampledItem, rate_limited: bool) -> SampleInfo {
    let stored = &sampled.item.item;
    SampleInfo {
        item: Some(PrioritizedItem {
            key: stored.key,
            table: stored.table.clone(),
            priority: sampled.priority,
            flat_trajectory: stored.flat_trajectory.clone(),
            inserted_at_ms: stored.inserted_at_ms,
            times_sampled: sampled.times_sampled,
        }),
        probability: sampled.probability,
        table_size: sampled.table_size,
        rate_limited,
    }
}

/// Finishes the stream cleanly once the client half-closed, the last task
/// completed, and every response has been flushed.
fn maybe_finish(core: &SampleCore, state: &mut ReactorState<SampleResponseCtx, SampleExt>) {
    if state.reads_done
        && !state.ext.waiting_for_enqueued_sample
        && state.ext.task.next_sample_size() == 0
        && state.responses_to_send.is_empty()
        && !state.write_in_flight
    {
        core.set_finished_locked(state, Status::new(tonic::Code::Ok, ""));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use replaydb_core::Chunk;
    use replaydb_proto::ChunkData;

    fn sampled_item_with_chunks(key: u64, chunk_sizes: &[usize]) -> SampledItem {
        let chunks: Vec<Arc<Chunk>> = chunk_sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                Arc::new(Chunk::new(ChunkData {
                    chunk_key: key * 100 + index as u64,
                    data: Bytes::from(vec![0u8; *size]),
                }))
            })
            .collect();
        SampledItem {
            item: Arc::new(TableItem {
                item: PrioritizedItem {
                    key,
                    table: "t".to_string(),
                    priority: 1.0,
                    flat_trajectory: None,
                    inserted_at_ms: 1,
                    times_sampled: 1,
                },
                chunks,
            }),
            priority: 1.0,
            times_sampled: 1,
            probability: 0.5,
            table_size: 1,
        }
    }

    fn fresh_state() -> ReactorState<SampleResponseCtx, SampleExt> {
        ReactorState {
            responses_to_send: Default::default(),
            read_in_flight: false,
            write_in_flight: false,
            reads_done: false,
            is_finished: false,
            finish_status: None,
            ext: SampleExt::default(),
        }
    }

    #[test]
    fn test_next_sample_size_policy() {
        let mut task = SampleTaskInfo {
            table: None,
            requested_samples: 10,
            fetched_samples: 0,
            flexible_batch_size: 4,
            timeout: None,
        };
        assert_eq!(task.next_sample_size(), 4);
        task.fetched_samples = 8;
        assert_eq!(task.next_sample_size(), 2);
        task.fetched_samples = 10;
        assert_eq!(task.next_sample_size(), 0);
    }

    #[test]
    fn test_process_sample_single_entry_per_chunk() {
        let mut state = fresh_state();
        let sampled = sampled_item_with_chunks(1, &[100, 100, 100]);
        process_sample(&mut state, &sampled, false, false);
        assert_eq!(state.responses_to_send.len(), 1);
        let entries = &state.responses_to_send[0].payload.entries;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].info.is_some());
        assert!(entries[1].info.is_none());
        assert_eq!(
            entries.iter().map(|e| e.end_of_sequence).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(state.responses_to_send[0].items.len(), 1);
    }

    #[test]
    fn test_process_sample_splits_at_size_cap() {
        let mut state = fresh_state();
        // Three chunks of ~600 KiB never share a 1 MiB response.
        let sampled = sampled_item_with_chunks(1, &[600 * 1024, 600 * 1024, 600 * 1024]);
        process_sample(&mut state, &sampled, false, false);
        assert_eq!(state.responses_to_send.len(), 3);
        for ctx in &state.responses_to_send {
            assert_eq!(ctx.payload.entries.len(), 1);
            let size: usize = ctx
                .payload
                .entries
                .iter()
                .map(|e| e.data.as_ref().map(|d| d.data.len()).unwrap_or(0))
                .sum();
            assert!(size <= MAX_SAMPLE_RESPONSE_SIZE_BYTES);
        }
        // The item is pinned to the last carrying response only.
        assert!(state.responses_to_send[0].items.is_empty());
        assert!(state.responses_to_send[1].items.is_empty());
        assert_eq!(state.responses_to_send[2].items.len(), 1);
        // End-of-sequence only on the final entry.
        let flags: Vec<bool> = state
            .responses_to_send
            .iter()
            .flat_map(|ctx| ctx.payload.entries.iter().map(|e| e.end_of_sequence))
            .collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn test_process_sample_oversized_chunk_travels_alone() {
        let mut state = fresh_state();
        let sampled = sampled_item_with_chunks(1, &[2 * 1024 * 1024, 100]);
        process_sample(&mut state, &sampled, false, false);
        assert_eq!(state.responses_to_send.len(), 2);
        assert_eq!(state.responses_to_send[0].payload.entries.len(), 1);
        assert_eq!(state.responses_to_send[1].payload.entries.len(), 1);
    }

    #[test]
    fn test_process_sample_respects_in_flight_head() {
        let mut state = fresh_state();
        state.responses_to_send.push_back(SampleResponseCtx::default());
        state.write_in_flight = true;
        let sampled = sampled_item_with_chunks(1, &[100]);
        process_sample(&mut state, &sampled, false, true);
        // The in-flight head must not be touched; a new response is opened.
        assert_eq!(state.responses_to_send.len(), 2);
        assert!(state.responses_to_send[0].payload.entries.is_empty());
        assert_eq!(state.responses_to_send[1].payload.entries.len(), 1);
    }
}
