//! # replaydb-proto
//!
//! Wire messages for the ReplayDB replay protocol.
//!
//! Messages are written by hand with prost derives (no protoc/build step);
//! field tags are part of the protocol and must never be reused. Chunk
//! payloads are `bytes::Bytes` so that queued responses clone shallowly.

use bytes::Bytes;

/// Sentinel for `SampleStreamRequest.flexible_batch_size` requesting the
/// table's default flexible batch size.
pub const AUTO_SELECT_BATCH_SIZE: i32 = -1;

/// An immutable blob of tensor data shared between items.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChunkData {
    /// Client-generated 64-bit key identifying this chunk.
    #[prost(uint64, tag = "1")]
    pub chunk_key: u64,

    /// Serialized tensor payload.
    #[prost(bytes = "bytes", tag = "2")]
    pub data: Bytes,
}

/// A reference to a slice of one chunk.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChunkSlice {
    /// Key of the chunk this slice points into.
    #[prost(uint64, tag = "1")]
    pub chunk_key: u64,

    /// Offset of the first element covered by the slice.
    #[prost(int32, tag = "2")]
    pub offset: i32,

    /// Number of elements covered by the slice.
    #[prost(int32, tag = "3")]
    pub length: i32,
}

/// The concrete list of chunk slices covered by an item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FlatTrajectory {
    #[prost(message, repeated, tag = "1")]
    pub slices: Vec<ChunkSlice>,
}

/// Trajectory descriptor stored in a priority table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrioritizedItem {
    /// Client-generated 64-bit key identifying this item.
    #[prost(uint64, tag = "1")]
    pub key: u64,

    /// Name of the table the item belongs to.
    #[prost(string, tag = "2")]
    pub table: String,

    #[prost(double, tag = "3")]
    pub priority: f64,

    #[prost(message, optional, tag = "4")]
    pub flat_trajectory: Option<FlatTrajectory>,

    /// Milliseconds since the Unix epoch at which the item was inserted.
    /// Populated by the server on admission.
    #[prost(int64, tag = "5")]
    pub inserted_at_ms: i64,

    #[prost(int32, tag = "6")]
    pub times_sampled: i32,
}

/// One message of the insert stream. Either list may be empty but not both.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InsertStreamRequest {
    #[prost(message, repeated, tag = "1")]
    pub chunks: Vec<ChunkData>,

    #[prost(message, repeated, tag = "2")]
    pub items: Vec<PrioritizedItem>,

    /// Keys of previously sent chunks that later items may still reference.
    /// Every other chunk held by the stream is released.
    #[prost(uint64, repeated, tag = "3")]
    pub keep_chunk_keys: Vec<u64>,
}

/// Acknowledgement of admitted items, in table-completion order.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InsertStreamResponse {
    #[prost(uint64, repeated, tag = "1")]
    pub keys: Vec<u64>,
}

/// One sampling task on the sample stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SampleStreamRequest {
    #[prost(string, tag = "1")]
    pub table: String,

    /// Total number of samples to return for this request. Must be > 0.
    #[prost(int64, tag = "2")]
    pub num_samples: i64,

    /// Maximum samples fetched from the table at a time. Must be > 0 or
    /// [`AUTO_SELECT_BATCH_SIZE`].
    #[prost(int32, tag = "3")]
    pub flexible_batch_size: i32,

    /// Rate limiter timeout in milliseconds. Absent or non-positive means
    /// wait indefinitely.
    #[prost(int64, optional, tag = "4")]
    pub rate_limiter_timeout_ms: Option<i64>,
}

/// Metadata attached to the first entry of each sampled item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SampleInfo {
    #[prost(message, optional, tag = "1")]
    pub item: Option<PrioritizedItem>,

    /// Probability with which the item was selected.
    #[prost(double, tag = "2")]
    pub probability: f64,

    /// Number of items in the table at sampling time.
    #[prost(int64, tag = "3")]
    pub table_size: i64,

    /// True if the sample had to wait on the rate limiter.
    #[prost(bool, tag = "4")]
    pub rate_limited: bool,
}

/// One chunk of one sampled item. An item spans one or more contiguous
/// entries across one or more responses; `info` is set on the first entry
/// and `end_of_sequence` on the last.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SampleEntry {
    #[prost(message, optional, tag = "1")]
    pub info: Option<SampleInfo>,

    #[prost(message, optional, tag = "2")]
    pub data: Option<ChunkData>,

    #[prost(bool, tag = "3")]
    pub end_of_sequence: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SampleStreamResponse {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<SampleEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckpointRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CheckpointResponse {
    #[prost(string, tag = "1")]
    pub checkpoint_path: String,
}

/// A priority update for one item.
#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyWithPriority {
    #[prost(uint64, tag = "1")]
    pub key: u64,

    #[prost(double, tag = "2")]
    pub priority: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MutatePrioritiesRequest {
    #[prost(string, tag = "1")]
    pub table: String,

    #[prost(message, repeated, tag = "2")]
    pub updates: Vec<KeyWithPriority>,

    #[prost(uint64, repeated, tag = "3")]
    pub delete_keys: Vec<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MutatePrioritiesResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetRequest {
    #[prost(string, tag = "1")]
    pub table: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerInfoRequest {}

/// 128-bit identifier split into two 64-bit halves.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Uint128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,

    #[prost(uint64, tag = "2")]
    pub low: u64,
}

/// Static and live information about one table.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TableInfo {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, tag = "2")]
    pub sampler: String,

    #[prost(int64, tag = "3")]
    pub max_size: i64,

    #[prost(int32, tag = "4")]
    pub max_times_sampled: i32,

    #[prost(int64, tag = "5")]
    pub current_size: i64,

    #[prost(int64, tag = "6")]
    pub num_inserts: i64,

    #[prost(int64, tag = "7")]
    pub num_samples: i64,

    #[prost(int64, tag = "8")]
    pub num_deletes: i64,

    #[prost(int64, tag = "9")]
    pub min_size_to_sample: i64,

    #[prost(double, tag = "10")]
    pub samples_per_insert: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerInfoResponse {
    #[prost(message, repeated, tag = "1")]
    pub table_info: Vec<TableInfo>,

    /// Random identifier of the current table-set incarnation. Clients use
    /// it to detect server restarts.
    #[prost(message, optional, tag = "2")]
    pub tables_state_id: Option<Uint128>,
}

/// Handshake of the same-process fast path.
#[derive(Clone, PartialEq, prost::Message)]
pub struct InitializeConnectionRequest {
    /// Process id of the client.
    #[prost(int64, tag = "1")]
    pub pid: i64,

    #[prost(string, tag = "2")]
    pub table_name: String,

    /// Set on the second request once the client has copied the table
    /// reference out of the transmitted address.
    #[prost(bool, tag = "3")]
    pub ownership_transferred: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InitializeConnectionResponse {
    /// Address of a heap cell holding a strong table reference, or 0 when
    /// the client and server are not part of the same process.
    #[prost(int64, tag = "1")]
    pub address: i64,
}
