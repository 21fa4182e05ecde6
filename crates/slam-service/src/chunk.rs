//! Chunked byte streaming for `pointCloudMap`/`internalState` (spec §4.D,
//! §6): raw bytes cut into 1 MiB chunks, the final one possibly shorter.

/// Chunk size for map/state streaming, in octets (spec §6).
pub const CHUNK_SIZE: usize = 1_048_576;

/// Yields `(bytes, end)` pairs over a fixed byte buffer. Once the final
/// chunk has been yielded, further calls keep returning the same
/// end-of-stream marker (an empty chunk, `end = true`) rather than
/// erroring (spec §4.D "chunked streaming contract").
pub struct ChunkIterator {
    data: Vec<u8>,
    offset: usize,
}

impl ChunkIterator {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    /// Total byte length being streamed, for tests and logging.
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Next `(chunk, end)` pair. `end` is true exactly on the chunk that
    /// reaches the end of the buffer (including the degenerate empty-buffer
    /// case, where the first and only call yields `(vec![], true)`).
    pub fn next_chunk(&mut self) -> (Vec<u8>, bool) {
        if self.offset >= self.data.len() {
            return (Vec::new(), true);
        }
        let end = (self.offset + CHUNK_SIZE).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        let is_last = self.offset >= self.data.len();
        (chunk, is_last)
    }

    /// Drain every remaining chunk and concatenate, for test round-trips.
    pub fn collect_all(mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len());
        loop {
            let (chunk, end) = self.next_chunk();
            let chunk_is_empty = chunk.is_empty();
            out.extend(chunk);
            if end {
                break;
            }
            if chunk_is_empty {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_yields_single_end_chunk() {
        let mut it = ChunkIterator::new(Vec::new());
        let (chunk, end) = it.next_chunk();
        assert!(chunk.is_empty());
        assert!(end);
        // Subsequent calls keep returning the same end marker.
        let (chunk2, end2) = it.next_chunk();
        assert!(chunk2.is_empty());
        assert!(end2);
    }

    #[test]
    fn test_small_buffer_single_chunk() {
        let data = vec![1, 2, 3, 4, 5];
        let mut it = ChunkIterator::new(data.clone());
        let (chunk, end) = it.next_chunk();
        assert_eq!(chunk, data);
        assert!(end);
    }

    #[test]
    fn test_exact_multiple_of_chunk_size() {
        let data = vec![7u8; CHUNK_SIZE * 2];
        let mut it = ChunkIterator::new(data.clone());
        let (c1, e1) = it.next_chunk();
        assert_eq!(c1.len(), CHUNK_SIZE);
        assert!(!e1);
        let (c2, e2) = it.next_chunk();
        assert_eq!(c2.len(), CHUNK_SIZE);
        assert!(e2);
    }

    #[test]
    fn test_final_chunk_is_shorter() {
        let data = vec![9u8; CHUNK_SIZE + 10];
        let mut it = ChunkIterator::new(data);
        let (c1, e1) = it.next_chunk();
        assert_eq!(c1.len(), CHUNK_SIZE);
        assert!(!e1);
        let (c2, e2) = it.next_chunk();
        assert_eq!(c2.len(), 10);
        assert!(e2);
    }

    #[test]
    fn test_collect_all_round_trips() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 37)).map(|i| (i % 251) as u8).collect();
        let it = ChunkIterator::new(data.clone());
        assert_eq!(it.collect_all(), data);
    }
}
