//! The per-series write buffer.
//!
//! A [`SeriesBuffer`] fronts the on-disk block store for one series. It
//! owns a fixed ring of [`BUCKET_COUNT`] block-aligned buckets; incoming
//! writes are admitted against `now` plus/minus the configured
//! tolerances, routed to the bucket whose window contains them, and
//! encoded immediately. As wall-clock advances, full buckets are
//! merge-compacted, sealed, and handed to the drain sink.
//!
//! # Ring addressing
//!
//! Buckets are addressed by `(timestamp / block_size) mod 3`. At any
//! instant only three windows can legally hold writes (the previous,
//! current, and next block), and adjacent windows always map to distinct
//! indices, so three physical buckets suffice and rotation never moves
//! data: a stale bucket is drained and rebound in place.
//!
//! # Serialization
//!
//! A buffer instance is not internally synchronized. The enclosing
//! series object must serialize all calls; pools injected through
//! [`BufferOptions`] are shared across series and synchronized
//! internally.

mod bucket;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::block::{FetchBlockMetadataResult, FetchBlockResult};
use crate::context::ReadContext;
use crate::encoding::{EncoderPool, MultiReaderIteratorPool, SegmentReader, StreamEncoder};
use crate::error::{BufferError, Result};
use crate::time::{truncate_to, TimeUnit, Timestamp};
use bucket::BufferBucket;
use tracing::{debug, error};

/// Number of buckets in the ring.
///
/// Three suffice to cover every window that can legally take writes:
/// the window just ended (drainable but possibly not yet drained), the
/// window containing now, and the next window reachable within the
/// future admission tolerance.
pub const BUCKET_COUNT: usize = 3;

/// Default bucket alignment width.
pub const DEFAULT_BLOCK_SIZE: Duration = Duration::from_secs(2 * 60 * 60);

/// Default admission tolerance into the past.
pub const DEFAULT_BUFFER_PAST: Duration = Duration::from_secs(10 * 60);

/// Default admission tolerance into the future.
pub const DEFAULT_BUFFER_FUTURE: Duration = Duration::from_secs(10 * 60);

/// Default per-column allocation hint for fresh encoders, in bytes.
pub const DEFAULT_ENCODER_ALLOC_SIZE: usize = 1024;

/// Clock function injected at construction.
///
/// Monotonicity is not required: a wall-clock jump beyond the block size
/// flags every bucket for drain and reset on the next access.
pub type NowFn = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Drain sink invoked with each sealed bucket.
///
/// Ownership of the encoder transfers to the callee; the buffer keeps no
/// reference to it afterwards.
pub type DrainFn = Box<dyn FnMut(Timestamp, StreamEncoder) + Send>;

fn system_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or(0)
}

/// Configuration for a [`SeriesBuffer`], read once at construction.
#[derive(Clone)]
pub struct BufferOptions {
    block_size: Duration,
    buffer_past: Duration,
    buffer_future: Duration,
    encoder_alloc_size: usize,
    clock: NowFn,
    encoder_pool: Arc<EncoderPool>,
    iterator_pool: Arc<MultiReaderIteratorPool>,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_past: DEFAULT_BUFFER_PAST,
            buffer_future: DEFAULT_BUFFER_FUTURE,
            encoder_alloc_size: DEFAULT_ENCODER_ALLOC_SIZE,
            clock: Arc::new(system_now),
            encoder_pool: Arc::new(EncoderPool::new()),
            iterator_pool: Arc::new(MultiReaderIteratorPool::new()),
        }
    }
}

impl BufferOptions {
    /// Sets the bucket alignment width.
    pub fn with_block_size(mut self, block_size: Duration) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the admission tolerance into the past.
    pub fn with_buffer_past(mut self, buffer_past: Duration) -> Self {
        self.buffer_past = buffer_past;
        self
    }

    /// Sets the admission tolerance into the future.
    pub fn with_buffer_future(mut self, buffer_future: Duration) -> Self {
        self.buffer_future = buffer_future;
        self
    }

    /// Sets the per-column allocation hint for fresh encoders.
    pub fn with_encoder_alloc_size(mut self, bytes: usize) -> Self {
        self.encoder_alloc_size = bytes;
        self
    }

    /// Sets the clock function.
    pub fn with_clock(mut self, clock: NowFn) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the shared encoder pool.
    pub fn with_encoder_pool(mut self, pool: Arc<EncoderPool>) -> Self {
        self.encoder_pool = pool;
        self
    }

    /// Sets the shared merge iterator pool.
    pub fn with_iterator_pool(mut self, pool: Arc<MultiReaderIteratorPool>) -> Self {
        self.iterator_pool = pool;
        self
    }

    /// Bucket alignment width.
    pub fn block_size(&self) -> Duration {
        self.block_size
    }

    /// Admission tolerance into the past.
    pub fn buffer_past(&self) -> Duration {
        self.buffer_past
    }

    /// Admission tolerance into the future.
    pub fn buffer_future(&self) -> Duration {
        self.buffer_future
    }

    /// Per-column allocation hint for fresh encoders.
    pub fn encoder_alloc_size(&self) -> usize {
        self.encoder_alloc_size
    }

    /// The injected clock function.
    pub fn clock(&self) -> &NowFn {
        &self.clock
    }

    /// The shared encoder pool.
    pub fn encoder_pool(&self) -> &EncoderPool {
        &self.encoder_pool
    }

    /// The shared merge iterator pool.
    pub fn iterator_pool(&self) -> &MultiReaderIteratorPool {
        &self.iterator_pool
    }

    pub(crate) fn block_size_ns(&self) -> i64 {
        self.block_size.as_nanos() as i64
    }
}

impl fmt::Debug for BufferOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferOptions")
            .field("block_size", &self.block_size)
            .field("buffer_past", &self.buffer_past)
            .field("buffer_future", &self.buffer_future)
            .field("encoder_alloc_size", &self.encoder_alloc_size)
            .finish_non_exhaustive()
    }
}

/// Lifetime counters for one buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Datapoints encoded into a bucket.
    pub points_written: u64,
    /// Datapoints dropped as duplicates of an already-encoded timestamp.
    pub points_deduped: u64,
    /// Buckets sealed and handed to the drain sink.
    pub buckets_drained: u64,
}

/// The per-series in-memory write buffer.
///
/// See the [module docs](self) for the ring and serialization model.
pub struct SeriesBuffer {
    opts: BufferOptions,
    drain_fn: DrainFn,
    buckets: [BufferBucket; BUCKET_COUNT],
    block_size_ns: i64,
    buffer_past_ns: i64,
    buffer_future_ns: i64,
    stats: BufferStats,
}

impl SeriesBuffer {
    /// Creates a buffer and binds its ring to the three windows
    /// straddling the current instant.
    pub fn new(drain_fn: DrainFn, opts: BufferOptions) -> Self {
        let block_size_ns = opts.block_size.as_nanos() as i64;
        let buffer_past_ns = opts.buffer_past.as_nanos() as i64;
        let buffer_future_ns = opts.buffer_future.as_nanos() as i64;
        let mut buffer = Self {
            opts,
            drain_fn,
            buckets: Default::default(),
            block_size_ns,
            buffer_past_ns,
            buffer_future_ns,
            stats: BufferStats::default(),
        };
        buffer.reset();
        buffer
    }

    fn now(&self) -> Timestamp {
        (self.opts.clock)()
    }

    /// Rebinds every bucket to the canonical windows around now,
    /// discarding buffered data.
    pub fn reset(&mut self) {
        let now = self.now();
        for (idx, window) in self.bucket_windows(now) {
            self.buckets[idx].reset_to(window, &self.opts);
        }
    }

    /// Admits and encodes one datapoint.
    ///
    /// A timestamp is accepted iff it lies strictly inside
    /// `(now - buffer_past, now + buffer_future)`. Rejections do not
    /// mutate state. A write whose window is not yet bound in the ring
    /// first drains and rotates the stale buckets.
    ///
    /// Writing a timestamp already present in the bucket succeeds without
    /// effect; the original value is kept.
    pub fn write(
        &mut self,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
    ) -> Result<()> {
        let now = self.now();
        let future_limit = now + self.buffer_future_ns;
        let past_limit = now - self.buffer_past_ns;
        if timestamp >= future_limit {
            return Err(BufferError::TooFuture {
                timestamp,
                future_limit,
            });
        }
        if timestamp <= past_limit {
            return Err(BufferError::TooPast {
                timestamp,
                past_limit,
            });
        }

        let bucket_start = truncate_to(timestamp, self.block_size_ns);
        let idx = self.bucket_index(timestamp);
        let (_, _, needs_reset) = self.bucket_state(now, &self.buckets[idx], bucket_start);
        if needs_reset {
            // The ring is stale against wall-clock; rotate before the
            // write lands.
            self.drain_and_reset(false);
        }

        let encoded = self.buckets[idx].write(timestamp, value, unit, annotation, &self.opts)?;
        if encoded {
            self.stats.points_written += 1;
        } else {
            self.stats.points_deduped += 1;
        }
        Ok(())
    }

    /// True when no bucket holds readable data.
    pub fn is_empty(&self) -> bool {
        let now = self.now();
        self.bucket_windows(now).iter().all(|&(idx, window)| {
            let (should_read, _, _) = self.bucket_state(now, &self.buckets[idx], window);
            !should_read
        })
    }

    /// True when any bucket must be drained to the block store.
    pub fn needs_drain(&self) -> bool {
        let now = self.now();
        self.bucket_windows(now).iter().any(|&(idx, window)| {
            let (_, needs_drain, _) = self.bucket_state(now, &self.buckets[idx], window);
            needs_drain
        })
    }

    /// Drains and rotates buckets against the current instant.
    ///
    /// Buckets needing a drain are merge-compacted, sealed, and handed to
    /// the sink; buckets whose window is stale are rebound. With `forced`
    /// every bucket holding undrained data is drained and rebound
    /// regardless of wall-clock.
    ///
    /// A bucket whose merge fails is left dirty and retried on the next
    /// pass; it never blocks the other buckets.
    pub fn drain_and_reset(&mut self, forced: bool) {
        let now = self.now();
        for (idx, window) in self.bucket_windows(now) {
            let (_, mut needs_drain, mut needs_reset) =
                self.bucket_state(now, &self.buckets[idx], window);
            if forced && !self.buckets[idx].drained && self.buckets[idx].has_values() {
                needs_drain = true;
                needs_reset = true;
            }

            if needs_drain {
                if let Err(err) = self.buckets[idx].sort(&self.opts) {
                    error!(
                        start = self.buckets[idx].start,
                        error = %err,
                        "bucket merge failed, leaving bucket dirty"
                    );
                    continue;
                }
                // After the sort there is a single run left.
                if let Some(mut encoder) = self.buckets[idx].take_encoder() {
                    encoder.seal();
                    let start = self.buckets[idx].start;
                    (self.drain_fn)(start, encoder);
                    self.buckets[idx].drained = true;
                    self.stats.buckets_drained += 1;
                    debug!(start, "drained bucket to block store");
                }
            }

            if needs_reset {
                self.buckets[idx].reset_to(window, &self.opts);
            }
        }
    }

    /// Collects per-run stream readers for every readable bucket whose
    /// window overlaps `[start, end)`.
    ///
    /// Buckets come back in ascending window order; runs within a bucket
    /// are not merged, the caller performs the cross-run merge. Every
    /// reader is registered on `ctx`.
    pub fn read_encoded(
        &self,
        ctx: &mut ReadContext,
        start: Timestamp,
        end: Timestamp,
    ) -> Vec<Vec<SegmentReader>> {
        let now = self.now();
        let mut results = Vec::new();
        for (idx, window) in self.bucket_windows(now) {
            let bucket = &self.buckets[idx];
            let (should_read, _, _) = self.bucket_state(now, bucket, window);
            if !should_read {
                continue;
            }
            if start >= bucket.start + self.block_size_ns {
                continue;
            }
            if bucket.start >= end {
                continue;
            }
            let readers = bucket.streams();
            for reader in &readers {
                ctx.register_reader(reader);
            }
            results.push(readers);
        }
        results
    }

    /// Collects stream readers for the readable buckets whose start is
    /// listed in `starts`.
    pub fn fetch_blocks(
        &self,
        ctx: &mut ReadContext,
        starts: &[Timestamp],
    ) -> Vec<FetchBlockResult> {
        let now = self.now();
        let mut results = Vec::new();
        for (idx, window) in self.bucket_windows(now) {
            let bucket = &self.buckets[idx];
            let (should_read, _, _) = self.bucket_state(now, bucket, window);
            if !should_read {
                continue;
            }
            // Callers pass a handful of starts; a linear scan beats
            // building a set.
            if !starts.contains(&bucket.start) {
                continue;
            }
            let readers = bucket.streams();
            for reader in &readers {
                ctx.register_reader(reader);
            }
            results.push(FetchBlockResult {
                start: bucket.start,
                readers,
            });
        }
        results
    }

    /// Summarizes the readable buckets.
    ///
    /// Buckets whose encoded size is zero are omitted. Checksums are
    /// never populated for buffered data; `_include_checksums` exists for
    /// signature parity with the on-disk path.
    pub fn fetch_blocks_metadata(
        &self,
        ctx: &mut ReadContext,
        include_sizes: bool,
        _include_checksums: bool,
    ) -> Vec<FetchBlockMetadataResult> {
        let now = self.now();
        let mut results = Vec::new();
        for (idx, window) in self.bucket_windows(now) {
            let bucket = &self.buckets[idx];
            let (should_read, _, _) = self.bucket_state(now, bucket, window);
            if !should_read {
                continue;
            }
            let readers = bucket.streams();
            let size: u64 = readers.iter().map(|reader| reader.len() as u64).sum();
            if size == 0 {
                continue;
            }
            for reader in &readers {
                ctx.register_reader(reader);
            }
            results.push(FetchBlockMetadataResult {
                start: bucket.start,
                size: include_sizes.then_some(size),
                checksum: None,
            });
        }
        results
    }

    /// Lifetime counters for this buffer.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// The configuration this buffer was built with.
    pub fn options(&self) -> &BufferOptions {
        &self.opts
    }

    fn bucket_index(&self, timestamp: Timestamp) -> usize {
        timestamp
            .div_euclid(self.block_size_ns)
            .rem_euclid(BUCKET_COUNT as i64) as usize
    }

    /// Pairs each physical bucket with the block-aligned window it should
    /// hold right now, in ascending window order starting from the
    /// past-most legitimate window.
    fn bucket_windows(&self, now: Timestamp) -> [(usize, Timestamp); BUCKET_COUNT] {
        let past_most = truncate_to(now, self.block_size_ns) - self.block_size_ns;
        let base = past_most.div_euclid(self.block_size_ns);
        std::array::from_fn(|i| {
            let offset = i as i64;
            let idx = (base + offset).rem_euclid(BUCKET_COUNT as i64) as usize;
            (idx, past_most + offset * self.block_size_ns)
        })
    }

    fn bucket_state(
        &self,
        now: Timestamp,
        bucket: &BufferBucket,
        expected_start: Timestamp,
    ) -> (bool, bool, bool) {
        let not_drained_has_values = !bucket.drained && bucket.has_values();

        let should_read = not_drained_has_values;
        let needs_reset = bucket.start != expected_start;
        // A bucket also needs draining once its window has aged past the
        // admission tolerance, even if the ring itself is not yet stale.
        let needs_drain = not_drained_has_values
            && (needs_reset || bucket.start + self.block_size_ns < now - self.buffer_past_ns);

        (should_read, needs_drain, needs_reset)
    }
}

impl fmt::Debug for SeriesBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesBuffer")
            .field("opts", &self.opts)
            .field("buckets", &self.buckets)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
