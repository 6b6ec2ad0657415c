//! Result types for block-oriented reads out of the buffer.

use crate::encoding::SegmentReader;
use crate::time::Timestamp;

/// One buffered block's worth of unmerged stream readers.
#[derive(Debug)]
pub struct FetchBlockResult {
    /// Block-aligned window start.
    pub start: Timestamp,
    /// One reader per ordered run; the caller merges across them.
    pub readers: Vec<SegmentReader>,
}

/// Metadata describing one buffered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchBlockMetadataResult {
    /// Block-aligned window start.
    pub start: Timestamp,
    /// Encoded size in bytes, when requested.
    pub size: Option<u64>,
    /// Always `None` for buffered data: checksums exist only once a block
    /// has been flushed to disk.
    pub checksum: Option<u32>,
}
