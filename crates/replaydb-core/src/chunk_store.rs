//! Weak-reference deduplicating chunk registry.

use crate::chunk::Chunk;
use parking_lot::Mutex;
use replaydb_commons::ChunkKey;
use replaydb_proto::ChunkData;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// How many inserts between sweeps of expired entries.
const REAP_INTERVAL: usize = 256;

/// Registry mapping chunk keys to weak references of live chunks.
///
/// The store never keeps a chunk alive on its own; any strong holder (an
/// insert stream's local map, an item in a table, a queued sample response)
/// does. Looking up a key whose chunk has been dropped behaves as if the key
/// were never inserted.
pub struct ChunkStore {
    chunks: Mutex<Registry>,
}

struct Registry {
    map: HashMap<ChunkKey, Weak<Chunk>>,
    inserts_since_reap: usize,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(Registry {
                map: HashMap::new(),
                inserts_since_reap: 0,
            }),
        }
    }

    /// Registers a chunk, deduplicating against a live entry with the same
    /// key. Returns the canonical strong reference.
    pub fn insert(&self, data: ChunkData) -> Arc<Chunk> {
        let key = data.chunk_key;
        let mut registry = self.chunks.lock();
        if let Some(existing) = registry.map.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let chunk = Arc::new(Chunk::new(data));
        registry.map.insert(key, Arc::downgrade(&chunk));
        registry.inserts_since_reap += 1;
        if registry.inserts_since_reap >= REAP_INTERVAL {
            registry.map.retain(|_, weak| weak.strong_count() > 0);
            registry.inserts_since_reap = 0;
        }
        chunk
    }

    /// Returns the live chunk registered under `key`, if any.
    pub fn get(&self, key: ChunkKey) -> Option<Arc<Chunk>> {
        self.chunks.lock().map.get(&key).and_then(Weak::upgrade)
    }

    /// Number of live entries currently registered.
    pub fn len(&self) -> usize {
        self.chunks
            .lock()
            .map
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk_data(key: ChunkKey) -> ChunkData {
        ChunkData {
            chunk_key: key,
            data: Bytes::from(vec![key as u8; 8]),
        }
    }

    #[test]
    fn test_insert_deduplicates_live_chunks() {
        let store = ChunkStore::new();
        let first = store.insert(chunk_data(1));
        let second = store.insert(chunk_data(1));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dropped_chunks_expire() {
        let store = ChunkStore::new();
        let chunk = store.insert(chunk_data(1));
        assert!(store.get(1).is_some());
        drop(chunk);
        assert!(store.get(1).is_none());
        assert!(store.is_empty());

        // Re-inserting the key after expiry produces a fresh chunk.
        let again = store.insert(chunk_data(1));
        assert_eq!(again.key(), 1);
        assert!(store.get(1).is_some());
    }
}
