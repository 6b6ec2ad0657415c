//! Sett - Write-side buffering for a distributed time series store.
//!
//! This crate provides the per-series in-memory write buffer that sits in
//! front of the on-disk block store. Incoming writes land here first, are
//! encoded into a compact columnar representation, and are periodically
//! drained as sealed blocks for long-term retention.
//!
//! # Components
//!
//! - [`SeriesBuffer`]: fixed ring of block-aligned buckets with admission,
//!   rotation, and drain handling
//! - [`StreamEncoder`] / [`StreamDecoder`]: streaming columnar compression
//!   for datapoints
//! - [`MultiReaderIterator`]: merge-sorted readback across encoded streams
//! - [`EncoderPool`] / [`MultiReaderIteratorPool`]: shared object pools for
//!   the hot write path
//!
//! # Example
//!
//! ```rust,ignore
//! use sett::{BufferOptions, SeriesBuffer, TimeUnit};
//!
//! // One buffer per series; the sink receives sealed encoders on drain.
//! let options = BufferOptions::default();
//! let mut buffer = SeriesBuffer::new(
//!     Box::new(|start, encoder| block_store.push(start, encoder)),
//!     options,
//! );
//!
//! // Writes are admitted against now +/- the configured tolerances.
//! buffer.write(now_ns, 0.75, TimeUnit::Nanoseconds, None)?;
//!
//! // Periodically hand full buckets to the sink.
//! if buffer.needs_drain() {
//!     buffer.drain_and_reset(false);
//! }
//! ```
//!
//! A buffer instance is not internally synchronized: the enclosing series
//! object is expected to serialize all calls. Pools are shared across
//! series and safe to use concurrently.

#![deny(missing_docs)]

pub mod block;
pub mod buffer;
pub mod context;
pub mod encoding;
pub mod error;
pub mod time;

pub use block::{FetchBlockMetadataResult, FetchBlockResult};
pub use buffer::{BufferOptions, BufferStats, DrainFn, NowFn, SeriesBuffer, BUCKET_COUNT};
pub use context::ReadContext;
pub use encoding::{
    Datapoint, EncoderPool, MultiReaderIterator, MultiReaderIteratorPool, Segment, SegmentReader,
    StreamDecoder, StreamEncoder,
};
pub use error::{BufferError, Result};
pub use time::{Timestamp, TimeUnit};
