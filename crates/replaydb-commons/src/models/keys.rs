//! Key aliases shared across the replay protocol.
//!
//! Chunks and items are both identified by client-generated 64-bit keys.
//! These aliases keep signatures readable without forcing conversions at the
//! wire boundary, where both travel as plain `u64` fields.

/// Identifier of an immutable chunk of tensor data.
pub type ChunkKey = u64;

/// Identifier of a prioritized item (trajectory descriptor).
pub type ItemKey = u64;
