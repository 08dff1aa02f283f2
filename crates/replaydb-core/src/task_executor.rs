//! Shared callback executor thread pool.

use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of named OS threads draining a FIFO of closures.
///
/// Tables deliver insert and sampling completions on this pool so that
/// neither table workers nor transport threads run reactor callbacks
/// directly. Tasks already queued when `close` is called are still executed.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
}

struct State {
    queue: VecDeque<Task>,
    closed: bool,
}

impl TaskExecutor {
    /// Spawns `num_threads` workers named `{name_prefix}-{index}`.
    pub fn new(num_threads: usize, name_prefix: &str) -> Self {
        assert!(num_threads > 0, "executor needs at least one thread");
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
            }),
            work_available: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name_prefix, index))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn executor thread");
            workers.push(handle);
        }
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a task. Tasks scheduled after `close` are dropped.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.queue.push_back(Box::new(task));
        drop(state);
        self.shared.work_available.notify_one();
    }

    /// Stops accepting tasks, drains the queue, and joins the workers.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.work_available.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        debug!("task executor stopped");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if state.closed {
                    return;
                }
                state = shared.work_available.wait(state).unwrap();
            }
        };
        task();
    }
}
