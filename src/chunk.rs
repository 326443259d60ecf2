//! Splitting encoded paths into link-sized writes, and joining them back.
//!
//! The link caps the size of a single write, so a path is sent as a run of
//! chunks of at most `max_chunk` bytes, in order. The receiving side
//! appends chunks until the path is complete.

/// Default maximum bytes per write.
pub const DEFAULT_MAX_CHUNK: usize = 512;

/// Cuts byte streams into chunks of at most `max_chunk` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chunk: usize,
}

impl Chunker {
    /// `max_chunk` is raised to at least 1.
    pub fn new(max_chunk: usize) -> Self {
        Self { max_chunk: max_chunk.max(1) }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Chunks of `data` in transmission order. Every chunk but the last is
    /// exactly `max_chunk` bytes.
    pub fn split<'a>(&self, data: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        data.chunks(self.max_chunk)
    }

    /// Number of writes needed for `len` bytes.
    pub fn count(&self, len: usize) -> usize {
        len.div_ceil(self.max_chunk)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK)
    }
}

/// Reassembles a path from its chunks.
///
/// Whole segments are available as soon as their last byte arrives; a
/// partial trailing segment stays buffered until more bytes come in.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    buf: Vec<u8>,
    segment_len: usize,
}

impl ChunkAssembler {
    /// `segment_len` bytes per segment (raised to at least 1).
    pub fn new(segment_len: usize) -> Self {
        Self { buf: Vec::new(), segment_len: segment_len.max(1) }
    }

    /// Discard everything received so far.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Complete segments received so far.
    pub fn segments(&self) -> std::slice::ChunksExact<'_, u8> {
        self.buf.chunks_exact(self.segment_len)
    }

    /// Bytes of an incomplete trailing segment.
    pub fn pending(&self) -> usize {
        self.buf.len() % self.segment_len
    }
}
