//! Block-aligned buckets and their ordered-run encoder slots.

use crate::buffer::BufferOptions;
use crate::encoding::{Datapoint, SegmentReader, StreamEncoder};
use crate::error::Result;
use crate::time::{truncate_to, TimeUnit, Timestamp};
use tracing::warn;

/// One monotonic sub-sequence inside a bucket.
///
/// A slot accepts a datapoint only when its timestamp strictly exceeds
/// the slot's watermark, so the backing encoder always holds a strictly
/// increasing run.
#[derive(Debug)]
pub(crate) struct OrderedRunEncoder {
    /// Watermark of the most recent append, `None` until the first write.
    pub(crate) last_write_at: Option<Timestamp>,
    pub(crate) encoder: StreamEncoder,
}

/// A buffer slot pinned to one block-aligned window.
///
/// State machine: `Empty` (no writes since the last reset) -> `Dirty`
/// (holding values) -> `Drained` (merged, sealed, and handed to the
/// sink). `reset_to` returns the bucket to `Empty` bound to a new
/// window.
#[derive(Debug, Default)]
pub(crate) struct BufferBucket {
    /// Block-aligned window start.
    pub(crate) start: Timestamp,
    /// Ordered runs, first-fit on write, merged on `sort`.
    pub(crate) encoders: Vec<OrderedRunEncoder>,
    /// Max timestamp observed across all runs since the last reset.
    pub(crate) last_write_at: Option<Timestamp>,
    /// Latched when a write arrives below the bucket watermark; cleared
    /// by `sort` and `reset_to`.
    pub(crate) out_of_order: bool,
    /// Set once the bucket's contents have been handed to the drain sink.
    pub(crate) drained: bool,
}

impl BufferBucket {
    /// Rebinds the bucket to a new window with a single fresh slot.
    pub(crate) fn reset_to(&mut self, start: Timestamp, opts: &BufferOptions) {
        for slot in self.encoders.drain(..) {
            slot.encoder.close(opts.encoder_pool());
        }
        let mut encoder = opts.encoder_pool().get();
        encoder.reset(start, opts.encoder_alloc_size());
        self.encoders.push(OrderedRunEncoder {
            last_write_at: None,
            encoder,
        });
        self.start = start;
        self.last_write_at = None;
        self.out_of_order = false;
        self.drained = false;
    }

    /// True once the bucket has accepted at least one write.
    pub(crate) fn has_values(&self) -> bool {
        self.last_write_at.is_some()
    }

    /// Routes one datapoint to an ordered run.
    ///
    /// Returns `Ok(true)` when the point was encoded and `Ok(false)` when
    /// it duplicated an existing timestamp and was dropped. Slot
    /// selection is first-fit: the first run whose watermark lies below
    /// the timestamp takes the point; if none can, a new run is opened.
    pub(crate) fn write(
        &mut self,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
        opts: &BufferOptions,
    ) -> Result<bool> {
        if !self.out_of_order && matches!(self.last_write_at, Some(last) if timestamp < last) {
            // Stays latched until the next sort or reset.
            self.out_of_order = true;
        }
        if self.last_write_at.map_or(true, |last| timestamp > last) {
            self.last_write_at = Some(timestamp);
        }

        let mut target = None;
        for (idx, slot) in self.encoders.iter().enumerate() {
            match slot.last_write_at {
                Some(last) if timestamp == last => return Ok(false),
                Some(last) if timestamp > last => {
                    target = Some(idx);
                    break;
                }
                None => {
                    target = Some(idx);
                    break;
                }
                Some(_) => {}
            }
        }
        let target = match target {
            Some(idx) => idx,
            None => {
                let mut encoder = opts.encoder_pool().get();
                encoder.reset(
                    truncate_to(timestamp, opts.block_size_ns()),
                    opts.encoder_alloc_size(),
                );
                self.encoders.push(OrderedRunEncoder {
                    last_write_at: None,
                    encoder,
                });
                self.encoders.len() - 1
            }
        };

        let slot = &mut self.encoders[target];
        slot.encoder
            .encode(Datapoint::new(timestamp, value), unit, annotation)?;
        slot.last_write_at = Some(timestamp);
        Ok(true)
    }

    /// Merge-compacts all runs into a single ordered run.
    ///
    /// No-op unless the bucket is out of order. On success the bucket
    /// holds exactly one slot; on failure the existing runs are kept and
    /// the bucket stays out of order.
    pub(crate) fn sort(&mut self, opts: &BufferOptions) -> Result<()> {
        if !self.out_of_order {
            return Ok(());
        }

        let mut merged = opts.encoder_pool().get();
        merged.reset(self.start, opts.encoder_alloc_size());

        let readers: Vec<SegmentReader> = self
            .encoders
            .iter()
            .filter_map(|slot| slot.encoder.stream())
            .collect();
        let mut iter = opts.iterator_pool().get();
        iter.reset(&readers);

        let mut merged_last = None;
        let mut merge_result = Ok(());
        for item in iter.by_ref() {
            match item {
                Ok((dp, unit, annotation)) => {
                    if let Err(err) = merged.encode(dp, unit, annotation.as_deref()) {
                        merge_result = Err(err);
                        break;
                    }
                    merged_last = Some(dp.timestamp);
                }
                Err(err) => {
                    merge_result = Err(err);
                    break;
                }
            }
        }
        iter.close();
        opts.iterator_pool().put(iter);

        if let Err(err) = merge_result {
            opts.encoder_pool().put(merged);
            return Err(err);
        }

        for slot in self.encoders.drain(..) {
            slot.encoder.close(opts.encoder_pool());
        }
        if merged_last.is_some() {
            self.last_write_at = merged_last;
        }
        self.encoders.push(OrderedRunEncoder {
            last_write_at: merged_last,
            encoder: merged,
        });
        self.out_of_order = false;
        Ok(())
    }

    /// Removes the bucket's sole remaining encoder for hand-off to the
    /// drain sink. The bucket keeps no reference to it afterwards.
    pub(crate) fn take_encoder(&mut self) -> Option<StreamEncoder> {
        debug_assert!(
            self.encoders.len() <= 1,
            "drain hand-off requires a merged bucket"
        );
        self.encoders.pop().map(|slot| slot.encoder)
    }

    /// Collects a stream reader per run.
    pub(crate) fn streams(&self) -> Vec<SegmentReader> {
        let mut readers = Vec::with_capacity(self.encoders.len());
        for slot in &self.encoders {
            match slot.encoder.stream() {
                Some(reader) => readers.push(reader),
                // A run in a readable bucket should always have values.
                None => warn!(
                    start = self.start,
                    "readable bucket run produced no stream, skipping"
                ),
            }
        }
        readers
    }
}
