//! In-memory priority table with rate-limited admission and weighted
//! sampling.

use crate::item::TableItem;
use crate::rate_limiter::RateLimiter;
use crate::selector::Selector;
use crate::table::{InsertCallback, SampleBatch, SampleCallback, SampledItem, Table};
use crate::task_executor::TaskExecutor;
use log::debug;
use rand::Rng;
use replaydb_commons::config::TableSettings;
use replaydb_commons::{ItemKey, ReplayError};
use replaydb_proto::{KeyWithPriority, TableInfo};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Fallback flexible batch size when the rate limiter does not suggest one.
const DEFAULT_FLEXIBLE_BATCH_SIZE: i32 = 64;

type Completion = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    item: Arc<TableItem>,
    priority: f64,
    times_sampled: i32,
}

struct PendingInsert {
    item: TableItem,
    insert_completed: Arc<InsertCallback>,
}

struct PendingSample {
    batch_size: i32,
    sampling_done: Arc<SampleCallback>,
    deadline: Option<Instant>,
    waited: bool,
}

struct TableData {
    entries: HashMap<ItemKey, Entry>,
    /// Live keys in arbitrary order, for O(1) uniform draws and removal.
    keys: Vec<ItemKey>,
    key_index: HashMap<ItemKey, usize>,
    /// Insertion order with lazily skipped stale keys, for FIFO eviction and
    /// the fifo selector.
    insert_order: VecDeque<ItemKey>,
    pending_inserts: VecDeque<PendingInsert>,
    pending_samples: VecDeque<PendingSample>,
    limiter: RateLimiter,
    executor: Option<Arc<TaskExecutor>>,
    closed: bool,
    num_inserts: i64,
    num_samples: i64,
    num_deletes: i64,
}

struct Shared {
    state: Mutex<TableData>,
    work_available: Condvar,
    name: String,
    max_size: i64,
    max_times_sampled: i32,
    selector: Selector,
}

/// A named priority buffer backed by a worker thread.
///
/// Inserts that the rate limiter cannot admit immediately are queued and
/// applied by the worker once the limiter allows, as are sampling requests.
/// Completions are delivered on the attached callback executor; when no
/// executor is attached (unit tests), they run inline on the thread that
/// completes the work, outside the table lock.
pub struct PriorityTable {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityTable {
    pub fn new(
        name: impl Into<String>,
        max_size: i64,
        selector: Selector,
        max_times_sampled: i32,
        limiter: RateLimiter,
    ) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(TableData {
                entries: HashMap::new(),
                keys: Vec::new(),
                key_index: HashMap::new(),
                insert_order: VecDeque::new(),
                pending_inserts: VecDeque::new(),
                pending_samples: VecDeque::new(),
                limiter,
                executor: None,
                closed: false,
                num_inserts: 0,
                num_samples: 0,
                num_deletes: 0,
            }),
            work_available: Condvar::new(),
            name: name.clone(),
            max_size,
            max_times_sampled,
            selector,
        });
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("table-{}", name))
            .spawn(move || worker_loop(worker_shared))
            .expect("failed to spawn table worker");
        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Builds a table from its configuration entry.
    pub fn from_settings(settings: &TableSettings) -> Result<Self, ReplayError> {
        let selector = Selector::from_settings(&settings.sampler, settings.priority_exponent)?;
        let limiter = RateLimiter::new(
            settings.samples_per_insert,
            settings.min_size_to_sample,
            settings.min_diff,
            settings.max_diff,
        );
        Ok(Self::new(
            settings.name.clone(),
            settings.max_size,
            selector,
            settings.max_times_sampled,
            limiter,
        ))
    }

    fn dispatch(executor: &Option<Arc<TaskExecutor>>, completions: Vec<Completion>) {
        for task in completions {
            match executor {
                Some(executor) => executor.schedule(task),
                None => task(),
            }
        }
    }
}

impl Table for PriorityTable {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn insert_or_assign_async(
        &self,
        item: TableItem,
        can_insert: &mut bool,
        insert_completed: Arc<InsertCallback>,
    ) -> Result<(), ReplayError> {
        let mut completions: Vec<Completion> = Vec::new();
        let executor;
        {
            let mut data = self.shared.state.lock().unwrap();
            if data.closed {
                return Err(ReplayError::cancelled(format!(
                    "table {} is closed",
                    self.shared.name
                )));
            }
            let key = item.item.key;
            if data.entries.contains_key(&key) {
                // Assign: update the priority of the existing item.
                let priority = item.item.priority;
                if let Some(entry) = data.entries.get_mut(&key) {
                    entry.priority = priority;
                }
                *can_insert = true;
                completions.push(Box::new(move || (*insert_completed)(key)));
            } else if !data.pending_inserts.is_empty() || !data.limiter.can_insert() {
                data.pending_inserts.push_back(PendingInsert {
                    item,
                    insert_completed,
                });
                *can_insert = false;
            } else {
                apply_insert(&mut data, &self.shared, item);
                *can_insert = true;
                completions.push(Box::new(move || (*insert_completed)(key)));
            }
            executor = data.executor.clone();
        }
        self.shared.work_available.notify_all();
        Self::dispatch(&executor, completions);
        Ok(())
    }

    fn enqueue_sample_request(
        &self,
        batch_size: i32,
        sampling_done: Arc<SampleCallback>,
        timeout: Option<std::time::Duration>,
    ) {
        {
            let mut data = self.shared.state.lock().unwrap();
            if data.closed {
                let name = self.shared.name.clone();
                let executor = data.executor.clone();
                drop(data);
                Self::dispatch(
                    &executor,
                    vec![Box::new(move || {
                        (*sampling_done)(Err(ReplayError::cancelled(format!(
                            "table {} is closed",
                            name
                        ))))
                    })],
                );
                return;
            }
            data.pending_samples.push_back(PendingSample {
                batch_size,
                sampling_done,
                deadline: timeout.map(|t| Instant::now() + t),
                waited: false,
            });
        }
        self.shared.work_available.notify_all();
    }

    fn mutate_items(
        &self,
        updates: &[KeyWithPriority],
        delete_keys: &[ItemKey],
    ) -> Result<(), ReplayError> {
        {
            let mut data = self.shared.state.lock().unwrap();
            if data.closed {
                return Err(ReplayError::cancelled(format!(
                    "table {} is closed",
                    self.shared.name
                )));
            }
            for key in delete_keys {
                remove_key(&mut data, *key);
            }
            for update in updates {
                // Updates for unknown keys are ignored.
                if let Some(entry) = data.entries.get_mut(&update.key) {
                    entry.priority = update.priority;
                }
            }
        }
        self.shared.work_available.notify_all();
        Ok(())
    }

    fn reset(&self) -> Result<(), ReplayError> {
        {
            let mut data = self.shared.state.lock().unwrap();
            if data.closed {
                return Err(ReplayError::cancelled(format!(
                    "table {} is closed",
                    self.shared.name
                )));
            }
            data.entries.clear();
            data.keys.clear();
            data.key_index.clear();
            data.insert_order.clear();
            data.limiter.reset();
            data.num_inserts = 0;
            data.num_samples = 0;
            data.num_deletes = 0;
        }
        self.shared.work_available.notify_all();
        Ok(())
    }

    fn close(&self) {
        let executor;
        let mut completions: Vec<Completion> = Vec::new();
        {
            let mut data = self.shared.state.lock().unwrap();
            if data.closed {
                return;
            }
            data.closed = true;
            // Pending sampling requests are cancelled; pending inserts are
            // dropped, releasing their callbacks so that reactor teardown
            // can complete.
            for pending in data.pending_samples.drain(..) {
                let name = self.shared.name.clone();
                let callback = pending.sampling_done;
                completions.push(Box::new(move || {
                    (*callback)(Err(ReplayError::cancelled(format!(
                        "table {} is closed",
                        name
                    ))))
                }));
            }
            data.pending_inserts.clear();
            executor = data.executor.clone();
        }
        self.shared.work_available.notify_all();
        Self::dispatch(&executor, completions);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug!("table {} closed", self.shared.name);
    }

    fn info(&self) -> TableInfo {
        let data = self.shared.state.lock().unwrap();
        TableInfo {
            name: self.shared.name.clone(),
            sampler: self.shared.selector.name().to_string(),
            max_size: self.shared.max_size,
            max_times_sampled: self.shared.max_times_sampled,
            current_size: data.entries.len() as i64,
            num_inserts: data.num_inserts,
            num_samples: data.num_samples,
            num_deletes: data.num_deletes,
            min_size_to_sample: data.limiter.min_size_to_sample(),
            samples_per_insert: data.limiter.samples_per_insert(),
        }
    }

    fn default_flexible_batch_size(&self) -> i32 {
        let data = self.shared.state.lock().unwrap();
        let samples_per_insert = data.limiter.samples_per_insert();
        if samples_per_insert > 0.0 {
            (samples_per_insert.ceil() as i32).max(1)
        } else {
            DEFAULT_FLEXIBLE_BATCH_SIZE
        }
    }

    fn set_callback_executor(&self, executor: Arc<TaskExecutor>) {
        self.shared.state.lock().unwrap().executor = Some(executor);
    }
}

impl Drop for PriorityTable {
    fn drop(&mut self) {
        self.close();
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Applies an insert that admission has cleared. The caller holds the table
/// lock and has verified that the key is not present.
fn apply_insert(data: &mut TableData, shared: &Shared, mut item: TableItem) {
    let key = item.item.key;
    if item.item.inserted_at_ms == 0 {
        item.item.inserted_at_ms = now_ms();
    }
    // FIFO eviction at capacity.
    while data.entries.len() as i64 >= shared.max_size {
        match oldest_live_key(data) {
            Some(oldest) => {
                remove_key(data, oldest);
            }
            None => break,
        }
    }
    let priority = item.item.priority;
    data.entries.insert(
        key,
        Entry {
            item: Arc::new(item),
            priority,
            times_sampled: 0,
        },
    );
    data.key_index.insert(key, data.keys.len());
    data.keys.push(key);
    data.insert_order.push_back(key);
    data.limiter.record_insert();
    data.num_inserts += 1;
}

/// Pops stale keys off the insertion order and returns the oldest live one.
fn oldest_live_key(data: &mut TableData) -> Option<ItemKey> {
    while let Some(front) = data.insert_order.front().copied() {
        if data.entries.contains_key(&front) {
            return Some(front);
        }
        data.insert_order.pop_front();
    }
    None
}

fn remove_key(data: &mut TableData, key: ItemKey) -> bool {
    if data.entries.remove(&key).is_none() {
        return false;
    }
    if let Some(index) = data.key_index.remove(&key) {
        data.keys.swap_remove(index);
        if index < data.keys.len() {
            let moved = data.keys[index];
            data.key_index.insert(moved, index);
        }
    }
    data.num_deletes += 1;
    true
}

/// Draws one key and its selection probability. The table is non-empty.
fn draw_key(data: &mut TableData, shared: &Shared, rng: &mut impl Rng) -> (ItemKey, f64) {
    let size = data.keys.len();
    if shared.selector.is_fifo() {
        let key = oldest_live_key(data).expect("non-empty table has a live oldest key");
        return (key, 1.0);
    }
    match &shared.selector {
        Selector::Prioritized { .. } => {
            let total: f64 = data
                .keys
                .iter()
                .map(|key| shared.selector.weight(data.entries[key].priority))
                .sum();
            if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                for key in &data.keys {
                    let weight = shared.selector.weight(data.entries[key].priority);
                    if target < weight {
                        return (*key, weight / total);
                    }
                    target -= weight;
                }
            }
            // All weights are zero; fall back to a uniform draw.
            let key = data.keys[rng.gen_range(0..size)];
            (key, 1.0 / size as f64)
        }
        _ => {
            let key = data.keys[rng.gen_range(0..size)];
            (key, 1.0 / size as f64)
        }
    }
}

/// Serves one sampling request. The rate limiter has admitted the first
/// draw; further draws continue while the limiter and batch size allow.
fn serve_sample(
    data: &mut TableData,
    shared: &Shared,
    rng: &mut impl Rng,
    request: &PendingSample,
) -> SampleBatch {
    let mut samples = Vec::new();
    while (samples.len() as i32) < request.batch_size {
        let size = data.entries.len() as i64;
        if size == 0 {
            break;
        }
        if !samples.is_empty() && !data.limiter.can_sample(size) {
            break;
        }
        let (key, probability) = draw_key(data, shared, rng);
        let (sampled, retire) = {
            let entry = data
                .entries
                .get_mut(&key)
                .expect("drawn key refers to a live entry");
            entry.times_sampled += 1;
            let sampled = SampledItem {
                item: Arc::clone(&entry.item),
                priority: entry.priority,
                times_sampled: entry.times_sampled,
                probability,
                table_size: size,
            };
            let retire =
                shared.max_times_sampled > 0 && entry.times_sampled >= shared.max_times_sampled;
            (sampled, retire)
        };
        data.limiter.record_sample();
        data.num_samples += 1;
        if retire {
            remove_key(data, key);
        }
        samples.push(sampled);
    }
    SampleBatch {
        samples,
        rate_limited: request.waited,
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut rng = rand::thread_rng();
    let mut data = shared.state.lock().unwrap();
    loop {
        if data.closed {
            return;
        }
        let mut completions: Vec<Completion> = Vec::new();

        // Admit queued inserts while the limiter allows.
        while !data.pending_inserts.is_empty() && data.limiter.can_insert() {
            let pending = data.pending_inserts.pop_front().expect("non-empty queue");
            let key = pending.item.item.key;
            if data.entries.contains_key(&key) {
                let priority = pending.item.item.priority;
                if let Some(entry) = data.entries.get_mut(&key) {
                    entry.priority = priority;
                }
            } else {
                apply_insert(&mut data, &shared, pending.item);
            }
            let callback = pending.insert_completed;
            completions.push(Box::new(move || (*callback)(key)));
        }

        // Serve sampling requests in arrival order.
        loop {
            let size = data.entries.len() as i64;
            let action = match data.pending_samples.front() {
                None => break,
                Some(request) => {
                    if data.limiter.can_sample(size) && size > 0 {
                        Action::Serve
                    } else if request
                        .deadline
                        .map(|deadline| Instant::now() >= deadline)
                        .unwrap_or(false)
                    {
                        Action::Timeout
                    } else {
                        Action::Wait
                    }
                }
            };
            match action {
                Action::Serve => {
                    let request = data.pending_samples.pop_front().expect("non-empty queue");
                    let batch = serve_sample(&mut data, &shared, &mut rng, &request);
                    let callback = request.sampling_done;
                    completions.push(Box::new(move || (*callback)(Ok(batch))));
                }
                Action::Timeout => {
                    let request = data.pending_samples.pop_front().expect("non-empty queue");
                    let name = shared.name.clone();
                    let callback = request.sampling_done;
                    completions.push(Box::new(move || {
                        (*callback)(Err(ReplayError::deadline_exceeded(format!(
                            "rate limiter timeout exceeded while sampling from table {}",
                            name
                        ))))
                    }));
                }
                Action::Wait => {
                    if let Some(request) = data.pending_samples.front_mut() {
                        request.waited = true;
                    }
                    break;
                }
            }
        }

        if !completions.is_empty() {
            let executor = data.executor.clone();
            drop(data);
            PriorityTable::dispatch(&executor, completions);
            data = shared.state.lock().unwrap();
            continue;
        }

        // Nothing to do; sleep until new work arrives or the nearest sample
        // deadline expires.
        let nearest_deadline = data
            .pending_samples
            .iter()
            .filter_map(|request| request.deadline)
            .min();
        match nearest_deadline {
            Some(deadline) => {
                let now = Instant::now();
                let wait = deadline.saturating_duration_since(now);
                let (guard, _) = shared.work_available.wait_timeout(data, wait).unwrap();
                data = guard;
            }
            None => {
                data = shared.work_available.wait(data).unwrap();
            }
        }
    }
}

enum Action {
    Serve,
    Timeout,
    Wait,
}
