//! Query-scoped lifetime management for stream readers.

use crate::encoding::SegmentReader;

/// Tracks the stream readers handed out during one query.
///
/// Read paths register every reader they return on the caller's context;
/// the context releases them all when it ends. Callers that hold readers
/// beyond the context's lifetime must clone the segments they need first.
#[derive(Debug, Default)]
pub struct ReadContext {
    readers: Vec<SegmentReader>,
    closed: bool,
}

impl ReadContext {
    /// Creates an open context with no registered readers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader to be released when the context ends.
    pub fn register_reader(&mut self, reader: &SegmentReader) {
        debug_assert!(!self.closed, "register on a closed read context");
        self.readers.push(reader.clone());
    }

    /// Number of readers registered so far.
    pub fn registered(&self) -> usize {
        self.readers.len()
    }

    /// Releases all registered readers. Idempotent.
    pub fn close(&mut self) {
        self.readers.clear();
        self.closed = true;
    }

    /// True once the context has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ReadContext {
    fn drop(&mut self) {
        self.close();
    }
}
