//! Items: trajectory descriptors plus the chunks that back them.

use crate::chunk::Chunk;
use replaydb_commons::ChunkKey;
use replaydb_proto::{FlatTrajectory, PrioritizedItem};
use std::sync::Arc;

/// A trajectory descriptor together with the strong chunk references that
/// keep its payload alive.
///
/// Invariant: `chunks`, keyed in order, exactly covers the distinct chunk
/// keys of the flat trajectory, in first-appearance order. The item is moved
/// into a table on insert; reactors hold it only transiently, and sampled
/// responses pin it until the last message carrying one of its chunks has
/// been handed to the transport.
#[derive(Debug)]
pub struct TableItem {
    pub item: PrioritizedItem,
    pub chunks: Vec<Arc<Chunk>>,
}

impl TableItem {
    pub fn key(&self) -> u64 {
        self.item.key
    }

    pub fn table(&self) -> &str {
        &self.item.table
    }
}

/// Returns the distinct chunk keys referenced by a flat trajectory, in
/// first-appearance order.
pub fn trajectory_chunk_keys(trajectory: &FlatTrajectory) -> Vec<ChunkKey> {
    let mut keys = Vec::new();
    for slice in &trajectory.slices {
        if !keys.contains(&slice.chunk_key) {
            keys.push(slice.chunk_key);
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaydb_proto::ChunkSlice;

    fn slice(chunk_key: u64) -> ChunkSlice {
        ChunkSlice {
            chunk_key,
            offset: 0,
            length: 1,
        }
    }

    #[test]
    fn test_trajectory_chunk_keys_dedups_in_order() {
        let trajectory = FlatTrajectory {
            slices: vec![slice(3), slice(1), slice(3), slice(2), slice(1)],
        };
        assert_eq!(trajectory_chunk_keys(&trajectory), vec![3, 1, 2]);
    }

    #[test]
    fn test_trajectory_chunk_keys_empty() {
        let trajectory = FlatTrajectory { slices: vec![] };
        assert!(trajectory_chunk_keys(&trajectory).is_empty());
    }
}
