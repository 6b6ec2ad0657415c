//! Columnar stream encoding for buffered datapoints.
//!
//! Datapoints are compressed into two bit columns as they arrive:
//!
//! - **Timestamp column**: delta-of-delta encoding. The first timestamp is
//!   written raw (64 bits); subsequent timestamps use variable-length
//!   prefix classes keyed by how far the delta drifts from the previous
//!   delta.
//! - **Value column**: XOR encoding of the IEEE-754 bits against the
//!   previous value, followed by the per-point unit and annotation
//!   markers (each written only when it changes between points).
//!
//! A [`StreamEncoder`] owns the two columns for one monotonic run.
//! [`StreamEncoder::stream`] snapshots them into a [`Segment`] whose
//! `head` holds the timestamp column and `tail` the value column;
//! [`StreamDecoder`] replays a snapshot point by point, and
//! [`MultiReaderIterator`] merge-sorts several snapshots into a single
//! timestamp-ordered sequence with duplicates coalesced.

pub mod decoder;
pub mod encoder;
pub mod iterator;
pub mod pool;

pub use decoder::StreamDecoder;
pub use encoder::{StreamEncoder, MAX_ANNOTATION_LEN};
pub use iterator::MultiReaderIterator;
pub use pool::{EncoderPool, MultiReaderIteratorPool};

use crate::time::Timestamp;
use bytes::Bytes;

/// A single timestamped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Absolute instant in nanoseconds since the Unix epoch.
    pub timestamp: Timestamp,
    /// Sample value.
    pub value: f64,
}

impl Datapoint {
    /// Creates a new datapoint.
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// An encoded byte segment snapshotted from a stream encoder.
///
/// `head` carries the timestamp column and `tail` the value column. Both
/// are cheaply cloneable shared buffers; a segment stays readable after
/// the encoder that produced it has been reset or handed off.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    /// Timestamp column bytes.
    pub head: Bytes,
    /// Value column bytes (values, unit markers, annotations).
    pub tail: Bytes,
}

impl Segment {
    /// Total encoded length in bytes.
    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// True when the segment holds no encoded bytes.
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }
}

/// A read-only view over one encoded stream.
///
/// Produced by [`StreamEncoder::stream`] and consumed by
/// [`StreamDecoder`]. Cloning is cheap; the underlying segment bytes are
/// shared.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    segment: Segment,
    count: u32,
}

impl SegmentReader {
    pub(crate) fn new(segment: Segment, count: u32) -> Self {
        Self { segment, count }
    }

    /// Returns the underlying segment.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Number of datapoints encoded in the stream.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Total encoded length in bytes.
    pub fn len(&self) -> usize {
        self.segment.len()
    }

    /// True when the stream holds no datapoints.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
