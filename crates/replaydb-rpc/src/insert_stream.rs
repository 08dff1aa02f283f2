//! Insert stream reactor.
//!
//! Clients upload chunks and items over a bidirectional stream; the server
//! acknowledges admitted item keys in table-completion order. Flow control
//! is tied to table admission: while an insert is queued behind the rate
//! limiter, the reader stays parked and the transport back-pressures the
//! client.

use crate::reactor::{CallbackCell, ReactorCore, ReactorState, ResponseCtx};
use crate::service_impl::ReplayServiceImpl;
use crate::status::{table_not_found, to_status};
use replaydb_commons::ChunkKey;
use replaydb_core::{trajectory_chunk_keys, Chunk, InsertCallback, TableItem};
use replaydb_proto::{InsertStreamRequest, InsertStreamResponse, PrioritizedItem};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Maximum buffered ack responses: one in flight, one accumulating keys.
/// Keys can always be coalesced into the tail, so deeper buffering only
/// wastes memory.
pub const MAX_QUEUED_INSERT_RESPONSES: usize = 2;

#[derive(Default)]
struct InsertResponseCtx {
    payload: InsertStreamResponse,
}

impl ResponseCtx for InsertResponseCtx {
    type Message = InsertStreamResponse;

    fn message(&self) -> &InsertStreamResponse {
        &self.payload
    }
}

#[derive(Default)]
struct InsertExt {
    /// Admissions handed to tables whose completion callback has not fired
    /// yet. The stream may only finish cleanly once this drops to zero.
    outstanding: usize,
}

type InsertCore = ReactorCore<InsertResponseCtx, InsertExt>;

/// Drives one insert stream to completion.
///
/// `requests` is the inbound message stream and `tx` the outbound response
/// channel; the function returns once the stream has terminated and no
/// completion callback can fire anymore.
pub async fn run_insert_stream<S>(
    service: ReplayServiceImpl,
    mut requests: S,
    tx: mpsc::Sender<Result<InsertStreamResponse, Status>>,
) where
    S: Stream<Item = Result<InsertStreamRequest, Status>> + Unpin + Send,
{
    let core: Arc<InsertCore> = ReactorCore::new(InsertExt::default());

    let insert_completed: CallbackCell<InsertCallback> = CallbackCell::new({
        let core = Arc::clone(&core);
        Arc::new(move |key: u64| {
            let mut state = core.state.lock();
            state.ext.outstanding = state.ext.outstanding.saturating_sub(1);
            // The table drained; resume input.
            core.maybe_start_read_locked(&mut state);
            if !state.is_finished {
                if state.responses_to_send.len() < MAX_QUEUED_INSERT_RESPONSES {
                    state.responses_to_send.push_back(InsertResponseCtx::default());
                }
                // The head may be in flight; keys accumulate in the tail.
                if let Some(tail) = state.responses_to_send.back_mut() {
                    tail.payload.keys.push(key);
                }
                if state.responses_to_send.len() == 1 {
                    core.maybe_send_next_response_locked(&mut state);
                }
            }
            maybe_finish(&core, &mut state);
        })
    });

    let writer = tokio::spawn(
        Arc::clone(&core).write_loop(tx, |core, state| maybe_finish(core, state)),
    );

    // Chunks received on this stream that have not been released. Only the
    // read pipeline touches the map, so it needs no synchronization.
    let mut chunks: HashMap<ChunkKey, Arc<Chunk>> = HashMap::new();
    while core.read_permit().await {
        match requests.next().await {
            Some(Ok(request)) => {
                let result = {
                    let mut state = core.state.lock();
                    process_incoming_request(
                        &service,
                        &mut state,
                        &mut chunks,
                        request,
                        &insert_completed,
                    )
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
    insert_completed.drain().await;
}

/// Finishes the stream cleanly once the client half-closed, every admission
/// completed, and all acks have been flushed.
fn maybe_finish(core: &InsertCore, state: &mut ReactorState<InsertResponseCtx, InsertExt>) {
    if state.reads_done
        && state.ext.outstanding == 0
        && state.responses_to_send.is_empty()
        && !state.write_in_flight
    {
        core.set_finished_locked(state, Status::new(tonic::Code::Ok, ""));
    }
}

fn process_incoming_request(
    service: &ReplayServiceImpl,
    state: &mut ReactorState<InsertResponseCtx, InsertExt>,
    chunks: &mut HashMap<ChunkKey, Arc<Chunk>>,
    mut request: InsertStreamRequest,
    insert_completed: &CallbackCell<InsertCallback>,
) -> Result<(), Status> {
    state.read_in_flight = false;
    if request.chunks.is_empty() && request.items.is_empty() {
        return Err(Status::invalid_argument(
            "InsertStream request lacks both chunks and items",
        ));
    }
    save_chunks(chunks, &mut request);
    if request.items.is_empty() {
        // No item to add to a table; continue reading the next request.
        state.read_in_flight = true;
        return Ok(());
    }
    let mut can_insert = true;
    let items = std::mem::take(&mut request.items);
    for request_item in items {
        let item = item_with_chunks(chunks, request_item)?;
        let table = match service.table_by_name(item.table()) {
            Some(table) => table,
            None => return Err(table_not_found(item.table())),
        };
        state.ext.outstanding += 1;
        table
            .insert_or_assign_async(item, &mut can_insert, insert_completed.handle())
            .map_err(to_status)?;
    }
    release_out_of_range_chunks(chunks, &request.keep_chunk_keys)?;
    if can_insert {
        // Nothing exceeded the table's admission buffer; keep reading.
        state.read_in_flight = true;
    }
    Ok(())
}

/// Stores every chunk of the request not already held by this stream.
/// Duplicates are silently dropped.
fn save_chunks(chunks: &mut HashMap<ChunkKey, Arc<Chunk>>, request: &mut InsertStreamRequest) {
    for chunk in request.chunks.drain(..) {
        chunks
            .entry(chunk.chunk_key)
            .or_insert_with(|| Arc::new(Chunk::new(chunk)));
    }
}

/// Builds the table item, gathering a strong reference for every chunk key
/// of its flat trajectory.
fn item_with_chunks(
    chunks: &HashMap<ChunkKey, Arc<Chunk>>,
    item: PrioritizedItem,
) -> Result<TableItem, Status> {
    let mut item_chunks = Vec::new();
    if let Some(trajectory) = &item.flat_trajectory {
        for key in trajectory_chunk_keys(trajectory) {
            match chunks.get(&key) {
                Some(chunk) => item_chunks.push(Arc::clone(chunk)),
                None => {
                    return Err(Status::internal(format!(
                        "Could not find sequence chunk {}.",
                        key
                    )));
                }
            }
        }
    }
    Ok(TableItem {
        item,
        chunks: item_chunks,
    })
}

/// Erases every held chunk whose key is not in `keep_keys`. The remaining
/// count must match, which also surfaces duplicate keep keys as an error.
fn release_out_of_range_chunks(
    chunks: &mut HashMap<ChunkKey, Arc<Chunk>>,
    keep_keys: &[u64],
) -> Result<(), Status> {
    chunks.retain(|key, _| keep_keys.contains(key));
    if chunks.len() != keep_keys.len() {
        return Err(Status::failed_precondition(format!(
            "Kept fewer chunks than expected: {} held != {} requested",
            chunks.len(),
            keep_keys.len()
        )));
    }
    Ok(())
}
