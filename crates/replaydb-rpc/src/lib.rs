//! # replaydb-rpc
//!
//! The gRPC surface of ReplayDB: the hand-rolled tonic service definition,
//! the per-stream reactors for `InsertStream` and `SampleStream`, the
//! same-process fast-path connection, and the service façade holding the
//! table registry.
//!
//! ## Architecture
//!
//! ```text
//! replay_service_server / replay_service_client   ← wire surface (service.rs)
//!     ↓
//! ReplayServiceImpl                               ← façade + unary handlers
//!     ↓
//! ReactorCore  → InsertStream / SampleStream      ← per-stream reactors
//!     ↓
//! Table / TaskExecutor (replaydb-core)            ← admission & sampling
//! ```

pub mod connection;
pub mod insert_stream;
pub mod sample_stream;
pub mod service;
pub mod service_impl;
pub mod status;

mod reactor;

// Re-export commonly used types
pub use connection::run_initialize_connection;
pub use insert_stream::{run_insert_stream, MAX_QUEUED_INSERT_RESPONSES};
pub use sample_stream::{
    run_sample_stream, MAX_QUEUED_SAMPLE_RESPONSES, MAX_SAMPLE_RESPONSE_SIZE_BYTES,
};
pub use service::{replay_service_client, replay_service_server};
pub use service_impl::ReplayServiceImpl;
