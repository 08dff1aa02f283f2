//! System-wide constants for ReplayDB.
//!
//! This module centralizes the numeric bounds shared by the service and its
//! clients. Protocol-level sentinels live next to the wire messages in
//! `replaydb-proto`.

/// Default number of threads in the shared callback executor pool.
///
/// Tables deliver insert and sampling completions on this pool; it must be
/// sized large enough to avoid head-of-line blocking across tables.
pub const DEFAULT_CALLBACK_EXECUTOR_THREADS: usize = 32;

/// Default port the server binary listens on.
pub const DEFAULT_PORT: u16 = 8000;

/// Default maximum number of items in a table created from configuration.
pub const DEFAULT_TABLE_MAX_SIZE: i64 = 1_000_000;
