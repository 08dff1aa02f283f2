//! Immutable chunk of tensor data.

use prost::Message;
use replaydb_commons::ChunkKey;
use replaydb_proto::ChunkData;

/// An immutable blob of tensor data identified by a 64-bit key.
///
/// Chunks are shared: several items may reference the same chunk, and a
/// chunk stays alive as long as any strong reference to it exists. The wire
/// message is wrapped unmodified so that sampled responses can reuse the
/// payload without copying.
#[derive(Debug)]
pub struct Chunk {
    data: ChunkData,
    encoded_byte_size: usize,
}

impl Chunk {
    /// Wraps a wire chunk, caching its serialized size.
    pub fn new(data: ChunkData) -> Self {
        let encoded_byte_size = data.encoded_len();
        Self {
            data,
            encoded_byte_size,
        }
    }

    pub fn key(&self) -> ChunkKey {
        self.data.chunk_key
    }

    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    /// Serialized size of the wire message, in bytes. Sample responses are
    /// coalesced against this value.
    pub fn encoded_byte_size(&self) -> usize {
        self.encoded_byte_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_chunk_caches_encoded_size() {
        let chunk = Chunk::new(ChunkData {
            chunk_key: 42,
            data: Bytes::from(vec![1u8; 100]),
        });
        assert_eq!(chunk.key(), 42);
        assert_eq!(chunk.encoded_byte_size(), chunk.data().encoded_len());
        assert!(chunk.encoded_byte_size() >= 100);
    }
}
