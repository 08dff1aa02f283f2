//! Bidirectional-stream reactor skeleton.
//!
//! Each streaming RPC is driven by a reactor built on [`ReactorCore`]: a
//! single mutex guards the response queue and the in-flight flags, a read
//! gate resumes the single reader at explicit points only, and a write gate
//! wakes the single writer whenever the queue head is claimed. Completion
//! callbacks handed to tables are held through a [`CallbackCell`] so that
//! teardown can wait until no callback referencing reactor state can fire.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tonic::Status;

/// How often to poll for callback completion during teardown.
pub(crate) const CALLBACK_WAIT_TIME: Duration = Duration::from_millis(1);

/// A prepared response waiting in the reactor queue.
///
/// Contexts own their wire payload plus whatever must stay alive until the
/// message has been handed to the transport (for sample streams, the strong
/// item references). The writer transmits a shallow clone of the payload and
/// drops the context, and with it the pinned state, after the send.
pub(crate) trait ResponseCtx: Send + 'static {
    type Message: Clone + Send + 'static;

    fn message(&self) -> &Self::Message;
}

pub(crate) struct ReactorState<C, E> {
    /// FIFO of prepared responses. The head is the one in flight once
    /// `write_in_flight` is set; callbacks may only touch entries behind it.
    pub responses_to_send: VecDeque<C>,
    /// True while the reader owns the stream. Cleared when a message enters
    /// processing and re-set only at explicit resumption points.
    pub read_in_flight: bool,
    pub write_in_flight: bool,
    /// The client half-closed; no further reads will be issued.
    pub reads_done: bool,
    /// One-way flag; once set, reads, writes, and callbacks take no effect.
    pub is_finished: bool,
    pub finish_status: Option<Status>,
    /// Specialisation state guarded by the same mutex.
    pub ext: E,
}

pub(crate) struct ReactorCore<C, E> {
    pub state: Mutex<ReactorState<C, E>>,
    read_gate: Notify,
    write_gate: Notify,
}

impl<C: ResponseCtx, E: Send + 'static> ReactorCore<C, E> {
    /// A fresh core with the initial read outstanding.
    pub fn new(ext: E) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReactorState {
                responses_to_send: VecDeque::new(),
                read_in_flight: true,
                write_in_flight: false,
                reads_done: false,
                is_finished: false,
                finish_status: None,
                ext,
            }),
            read_gate: Notify::new(),
            write_gate: Notify::new(),
        })
    }

    /// Resumes the reader if no read is in flight and the stream is still
    /// live.
    pub fn maybe_start_read_locked(&self, state: &mut ReactorState<C, E>) {
        if !state.read_in_flight && !state.reads_done && !state.is_finished {
            state.read_in_flight = true;
            self.read_gate.notify_one();
        }
    }

    /// Claims the queue head for transmission if no write is in flight.
    pub fn maybe_send_next_response_locked(&self, state: &mut ReactorState<C, E>) {
        if !state.write_in_flight && !state.responses_to_send.is_empty() && !state.is_finished {
            state.write_in_flight = true;
            self.write_gate.notify_one();
        }
    }

    /// One-way terminal transition: drops queued responses and records the
    /// completion status. Idempotent after the first call.
    pub fn set_finished_locked(&self, state: &mut ReactorState<C, E>, status: Status) {
        if state.is_finished {
            return;
        }
        state.is_finished = true;
        state.finish_status = Some(status);
        state.responses_to_send.clear();
        self.read_gate.notify_one();
        self.write_gate.notify_one();
    }

    pub fn set_finished(&self, status: Status) {
        let mut state = self.state.lock();
        self.set_finished_locked(&mut state, status);
    }

    /// Blocks until the next read may be issued. Returns false when the
    /// reactor finished instead.
    pub async fn read_permit(&self) -> bool {
        loop {
            let notified = self.read_gate.notified();
            {
                let state = self.state.lock();
                if state.is_finished {
                    return false;
                }
                if state.read_in_flight {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Single-writer loop.
    ///
    /// Transmits a shallow clone of the claimed head, pops it once the
    /// transport accepted the message, runs `on_write_done` under the mutex,
    /// and chains the next write. On finish, a non-OK status is forwarded to
    /// the client before the loop returns and the sender is dropped.
    pub async fn write_loop(
        self: Arc<Self>,
        tx: mpsc::Sender<Result<C::Message, Status>>,
        mut on_write_done: impl FnMut(&Self, &mut ReactorState<C, E>),
    ) {
        loop {
            let notified = self.write_gate.notified();
            let message = {
                let state = self.state.lock();
                if state.is_finished {
                    break;
                }
                if state.write_in_flight {
                    state
                        .responses_to_send
                        .front()
                        .map(|ctx| ctx.message().clone())
                } else {
                    None
                }
            };
            match message {
                Some(message) => {
                    if tx.send(Ok(message)).await.is_err() {
                        // The client went away; nothing further can be
                        // delivered.
                        self.set_finished(Status::cancelled("stream closed by client"));
                        break;
                    }
                    let mut state = self.state.lock();
                    // Dropping the head releases any state pinned to it.
                    state.responses_to_send.pop_front();
                    state.write_in_flight = false;
                    on_write_done(&self, &mut state);
                    if !state.is_finished && !state.responses_to_send.is_empty() {
                        state.write_in_flight = true;
                    }
                }
                None => notified.await,
            }
        }
        let status = self.state.lock().finish_status.clone();
        if let Some(status) = status {
            if status.code() != tonic::Code::Ok {
                let _ = tx.send(Err(status)).await;
            }
        }
    }
}

/// Shared-ownership cell for a completion callback.
///
/// The reactor driver owns the cell; tables receive strong handles when work
/// is enqueued and drop them once the callback has run (or was abandoned).
/// [`CallbackCell::drain`] is the teardown primitive: it gives up the
/// driver's reference and spins until no other strong handle remains, which
/// is the only safe point to drop state the callback captures.
pub(crate) struct CallbackCell<F: ?Sized> {
    callback: Arc<F>,
}

impl<F: ?Sized> CallbackCell<F> {
    pub fn new(callback: Arc<F>) -> Self {
        Self { callback }
    }

    /// A strong handle for registering the callback with a table.
    pub fn handle(&self) -> Arc<F> {
        Arc::clone(&self.callback)
    }

    /// Drops the cell's reference and waits until every outstanding handle
    /// is gone.
    pub async fn drain(self) {
        let weak = Arc::downgrade(&self.callback);
        drop(self.callback);
        while weak.upgrade().is_some() {
            tokio::time::sleep(CALLBACK_WAIT_TIME).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    struct TestCtx(u32);

    impl ResponseCtx for TestCtx {
        type Message = u32;

        fn message(&self) -> &u32 {
            &self.0
        }
    }

    fn test_core() -> Arc<ReactorCore<TestCtx, ()>> {
        ReactorCore::new(())
    }

    #[tokio::test]
    async fn test_read_permit_resumes_on_callback() {
        let core = test_core();
        // Initial read is outstanding.
        assert!(core.read_permit().await);
        {
            let mut state = core.state.lock();
            state.read_in_flight = false;
        }
        let waiter = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.read_permit().await })
        };
        // Resume from a synchronous "callback" context.
        {
            let mut state = core.state.lock();
            core.maybe_start_read_locked(&mut state);
        }
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_set_finished_is_one_way() {
        let core = test_core();
        {
            let mut state = core.state.lock();
            state.responses_to_send.push_back(TestCtx(1));
        }
        core.set_finished(Status::internal("boom"));
        core.set_finished(Status::new(tonic::Code::Ok, ""));
        let state = core.state.lock();
        assert!(state.is_finished);
        assert!(state.responses_to_send.is_empty());
        assert_eq!(
            state.finish_status.as_ref().map(|s| s.code()),
            Some(tonic::Code::Internal)
        );
        // Finished reactors refuse new reads.
        drop(state);
        assert!(!core.read_permit().await);
    }

    #[tokio::test]
    async fn test_write_loop_sends_in_order_and_forwards_error() {
        let core = test_core();
        let (tx, mut rx) = mpsc::channel(1);
        let writer = tokio::spawn(Arc::clone(&core).write_loop(tx, |_, _| {}));

        {
            let mut state = core.state.lock();
            state.responses_to_send.push_back(TestCtx(1));
            state.responses_to_send.push_back(TestCtx(2));
            core.maybe_send_next_response_locked(&mut state);
        }
        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap(), 2);

        core.set_finished(Status::internal("boom"));
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
        writer.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_callback_cell_drain_waits_for_handles() {
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(|| {});
        let cell = CallbackCell::new(callback);
        let handle = cell.handle();
        let drained = tokio::spawn(cell.drain());
        // The outstanding handle keeps the drain spinning.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());
        drop(handle);
        timeout(Duration::from_secs(1), drained).await.unwrap().unwrap();
    }
}
