//! Streaming encoder for one monotonic run of datapoints.

use crate::encoding::{Datapoint, Segment, SegmentReader};
use crate::error::{BufferError, Result};
use crate::time::{Timestamp, TimeUnit};
use bitvec::prelude::*;
use bytes::Bytes;

use super::pool::EncoderPool;

/// Maximum encodable annotation length in bytes.
///
/// Annotation payloads are length-prefixed with 16 bits on the wire.
pub const MAX_ANNOTATION_LEN: usize = u16::MAX as usize;

type BitBuf = BitVec<u8, Msb0>;

/// Appends the low `bits` bits of `value`, most significant first.
fn push_bits(out: &mut BitBuf, value: u64, bits: u32) {
    for i in (0..bits).rev() {
        out.push((value >> i) & 1 == 1);
    }
}

fn reserve_bytes(buf: &mut BitBuf, bytes: usize) {
    let want = bytes * 8;
    if buf.capacity() < want {
        buf.reserve(want - buf.capacity());
    }
}

/// Delta-of-delta state for the timestamp column.
///
/// The first timestamp is written raw. Subsequent timestamps encode the
/// drift of their delta from the previous delta:
///
/// - `0`: drift is zero (regular interval)
/// - `10` + 7 bits: drift in `[-63, 64]`
/// - `110` + 9 bits: drift in `[-255, 256]`
/// - `1110` + 12 bits: drift in `[-2047, 2048]`
/// - `1111` + 64 bits: anything else
///
/// The widest class carries the full 64 bits because nanosecond instants
/// in a fresh run can open with deltas far beyond 32-bit range.
#[derive(Debug, Default)]
struct TimestampColumn {
    initialized: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampColumn {
    fn encode(&mut self, timestamp: i64, out: &mut BitBuf) {
        if !self.initialized {
            self.initialized = true;
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            push_bits(out, timestamp as u64, 64);
            return;
        }

        let delta = timestamp.wrapping_sub(self.prev_ts);
        let dod = delta.wrapping_sub(self.prev_delta);
        match dod {
            0 => out.push(false),
            -63..=64 => {
                push_bits(out, 0b10, 2);
                push_bits(out, (dod + 63) as u64, 7);
            }
            -255..=256 => {
                push_bits(out, 0b110, 3);
                push_bits(out, (dod + 255) as u64, 9);
            }
            -2047..=2048 => {
                push_bits(out, 0b1110, 4);
                push_bits(out, (dod + 2047) as u64, 12);
            }
            _ => {
                push_bits(out, 0b1111, 4);
                push_bits(out, dod as u64, 64);
            }
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// XOR state for the value column.
///
/// Identical values cost a single `0` bit. Otherwise the XOR against the
/// previous value is written either inside the previous meaningful-bit
/// window (`10` + bits) or with a fresh window header (`11` + 5-bit
/// leading-zero count + 6-bit length + bits).
#[derive(Debug)]
struct ValueColumn {
    initialized: bool,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl Default for ValueColumn {
    fn default() -> Self {
        Self {
            initialized: false,
            prev_bits: 0,
            // Wider than any encodable window, so the first changed value
            // always opens a fresh window.
            prev_leading: 64,
            prev_trailing: 64,
        }
    }
}

impl ValueColumn {
    fn encode(&mut self, value: f64, out: &mut BitBuf) {
        let bits = value.to_bits();
        if !self.initialized {
            self.initialized = true;
            self.prev_bits = bits;
            push_bits(out, bits, 64);
            return;
        }

        let xor = bits ^ self.prev_bits;
        if xor == 0 {
            out.push(false);
        } else {
            out.push(true);
            // Leading zeros are capped at 31 to fit the 5-bit header; the
            // capped value must be used for the window arithmetic as well,
            // or encoder and decoder windows drift apart.
            let leading = xor.leading_zeros().min(31);
            let trailing = xor.trailing_zeros();

            if leading >= self.prev_leading && trailing >= self.prev_trailing {
                out.push(false);
                let meaningful = 64 - self.prev_leading - self.prev_trailing;
                push_bits(out, xor >> self.prev_trailing, meaningful);
            } else {
                out.push(true);
                push_bits(out, leading as u64, 5);
                let meaningful = 64 - leading - trailing;
                push_bits(out, (meaningful - 1) as u64, 6);
                push_bits(out, xor >> trailing, meaningful);
                self.prev_leading = leading;
                self.prev_trailing = trailing;
            }
        }

        self.prev_bits = bits;
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Streaming columnar encoder for one ordered run of datapoints.
///
/// An encoder is bound to a block-aligned start instant via
/// [`StreamEncoder::reset`] and accepts appends until sealed. Within a
/// run the caller must append timestamps in strictly increasing order;
/// ordering is enforced one level up by the owning bucket slot.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    start: Timestamp,
    count: u32,
    sealed: bool,
    ts_bits: BitBuf,
    val_bits: BitBuf,
    ts_col: TimestampColumn,
    val_col: ValueColumn,
    unit: Option<TimeUnit>,
    annotation: Option<Bytes>,
}

impl StreamEncoder {
    /// Creates an empty, unbound encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebinds the encoder to a new block start and clears all state.
    ///
    /// `alloc_size` is a per-column allocation hint in bytes; buffers
    /// already larger than the hint keep their capacity.
    pub fn reset(&mut self, start: Timestamp, alloc_size: usize) {
        self.start = start;
        self.count = 0;
        self.sealed = false;
        self.ts_bits.clear();
        self.val_bits.clear();
        reserve_bytes(&mut self.ts_bits, alloc_size);
        reserve_bytes(&mut self.val_bits, alloc_size);
        self.ts_col.reset();
        self.val_col.reset();
        self.unit = None;
        self.annotation = None;
    }

    /// Appends one datapoint with its unit tag and optional annotation.
    ///
    /// An empty annotation is treated as absent. On error the encoder
    /// state is unchanged.
    pub fn encode(
        &mut self,
        dp: Datapoint,
        unit: TimeUnit,
        annotation: Option<&[u8]>,
    ) -> Result<()> {
        if self.sealed {
            return Err(BufferError::EncoderSealed);
        }
        let annotation = annotation.filter(|a| !a.is_empty());
        if let Some(a) = annotation {
            if a.len() > MAX_ANNOTATION_LEN {
                return Err(BufferError::AnnotationTooLarge {
                    len: a.len(),
                    max: MAX_ANNOTATION_LEN,
                });
            }
        }

        self.ts_col.encode(dp.timestamp, &mut self.ts_bits);
        self.val_col.encode(dp.value, &mut self.val_bits);

        if self.unit == Some(unit) {
            self.val_bits.push(false);
        } else {
            self.val_bits.push(true);
            push_bits(&mut self.val_bits, unit.code() as u64, 8);
            self.unit = Some(unit);
        }

        if self.annotation.as_deref() == annotation {
            self.val_bits.push(false);
        } else {
            self.val_bits.push(true);
            let payload = annotation.unwrap_or(&[]);
            push_bits(&mut self.val_bits, payload.len() as u64, 16);
            for &byte in payload {
                push_bits(&mut self.val_bits, byte as u64, 8);
            }
            self.annotation = annotation.map(Bytes::copy_from_slice);
        }

        self.count += 1;
        Ok(())
    }

    /// Marks the encoder immutable; further appends fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// True once [`StreamEncoder::seal`] has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// The block-aligned start instant this encoder is bound to.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Number of datapoints encoded since the last reset.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Encoded length in bytes across both columns.
    pub fn len(&self) -> usize {
        self.ts_bits.as_raw_slice().len() + self.val_bits.as_raw_slice().len()
    }

    /// True when no datapoints have been encoded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Snapshots the encoded columns into a readable stream.
    ///
    /// Returns `None` when the encoder holds no datapoints. The snapshot
    /// is independent of the encoder: later appends, resets, or hand-offs
    /// do not invalidate it.
    pub fn stream(&self) -> Option<SegmentReader> {
        if self.count == 0 {
            return None;
        }
        let segment = Segment {
            head: Bytes::copy_from_slice(self.ts_bits.as_raw_slice()),
            tail: Bytes::copy_from_slice(self.val_bits.as_raw_slice()),
        };
        Some(SegmentReader::new(segment, self.count))
    }

    /// Returns the encoder to a pool for reuse.
    pub fn close(self, pool: &EncoderPool) {
        pool.put(self);
    }
}
