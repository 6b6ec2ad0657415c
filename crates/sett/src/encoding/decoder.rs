//! Readback of encoded segment snapshots.

use crate::encoding::{Datapoint, SegmentReader};
use crate::error::{BufferError, Result};
use crate::time::TimeUnit;
use bytes::Bytes;

/// Bit-granular cursor over a shared byte buffer, most significant bit
/// first.
#[derive(Debug)]
struct BitCursor {
    data: Bytes,
    pos: usize,
}

impl BitCursor {
    fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool> {
        let byte = self.pos / 8;
        if byte >= self.data.len() {
            return Err(BufferError::CorruptStream(
                "unexpected end of stream".to_string(),
            ));
        }
        let bit = (self.data[byte] >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, bits: u32) -> Result<u64> {
        let mut value = 0_u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }
}

/// Decoder over one encoded stream snapshot.
///
/// Yields `(datapoint, unit, annotation)` tuples in encoded order. The
/// decoder owns cheap clones of the snapshot buffers, so it is
/// independent of the encoder that produced the stream.
#[derive(Debug)]
pub struct StreamDecoder {
    ts: BitCursor,
    val: BitCursor,
    remaining: u32,

    ts_initialized: bool,
    prev_ts: i64,
    prev_delta: i64,

    val_initialized: bool,
    prev_bits: u64,
    prev_leading: u32,
    prev_trailing: u32,

    unit: TimeUnit,
    annotation: Option<Bytes>,
}

impl StreamDecoder {
    /// Creates a decoder positioned at the start of the stream.
    pub fn new(reader: &SegmentReader) -> Self {
        Self {
            ts: BitCursor::new(reader.segment().head.clone()),
            val: BitCursor::new(reader.segment().tail.clone()),
            remaining: reader.count(),
            ts_initialized: false,
            prev_ts: 0,
            prev_delta: 0,
            val_initialized: false,
            prev_bits: 0,
            // Mirrors the encoder's unset window; a well-formed stream
            // always opens a window before reusing one.
            prev_leading: 64,
            prev_trailing: 64,
            unit: TimeUnit::default(),
            annotation: None,
        }
    }

    fn decode_timestamp(&mut self) -> Result<i64> {
        if !self.ts_initialized {
            self.ts_initialized = true;
            let ts = self.ts.read_bits(64)? as i64;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Ok(ts);
        }

        let dod = if !self.ts.read_bit()? {
            0
        } else if !self.ts.read_bit()? {
            self.ts.read_bits(7)? as i64 - 63
        } else if !self.ts.read_bit()? {
            self.ts.read_bits(9)? as i64 - 255
        } else if !self.ts.read_bit()? {
            self.ts.read_bits(12)? as i64 - 2047
        } else {
            self.ts.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        let ts = self.prev_ts.wrapping_add(delta);
        self.prev_delta = delta;
        self.prev_ts = ts;
        Ok(ts)
    }

    fn decode_value(&mut self) -> Result<f64> {
        if !self.val_initialized {
            self.val_initialized = true;
            let bits = self.val.read_bits(64)?;
            self.prev_bits = bits;
            return Ok(f64::from_bits(bits));
        }

        let xor = if !self.val.read_bit()? {
            0
        } else if !self.val.read_bit()? {
            if self.prev_leading >= 64 {
                return Err(BufferError::CorruptStream(
                    "window reuse before any window was opened".to_string(),
                ));
            }
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            self.val.read_bits(meaningful)? << self.prev_trailing
        } else {
            let leading = self.val.read_bits(5)? as u32;
            let meaningful = self.val.read_bits(6)? as u32 + 1;
            if leading + meaningful > 64 {
                return Err(BufferError::CorruptStream(format!(
                    "invalid value window: {leading} leading + {meaningful} meaningful bits"
                )));
            }
            let trailing = 64 - leading - meaningful;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            self.val.read_bits(meaningful)? << trailing
        };

        let bits = self.prev_bits ^ xor;
        self.prev_bits = bits;
        Ok(f64::from_bits(bits))
    }

    fn decode_markers(&mut self) -> Result<()> {
        if self.val.read_bit()? {
            let code = self.val.read_bits(8)? as u8;
            self.unit = TimeUnit::from_code(code).ok_or_else(|| {
                BufferError::CorruptStream(format!("unknown time unit code {code}"))
            })?;
        }
        if self.val.read_bit()? {
            let len = self.val.read_bits(16)? as usize;
            if len == 0 {
                self.annotation = None;
            } else {
                let mut payload = Vec::with_capacity(len);
                for _ in 0..len {
                    payload.push(self.val.read_bits(8)? as u8);
                }
                self.annotation = Some(Bytes::from(payload));
            }
        }
        Ok(())
    }

    fn decode_point(&mut self) -> Result<(Datapoint, TimeUnit, Option<Bytes>)> {
        let timestamp = self.decode_timestamp()?;
        let value = self.decode_value()?;
        self.decode_markers()?;
        Ok((
            Datapoint::new(timestamp, value),
            self.unit,
            self.annotation.clone(),
        ))
    }
}

impl Iterator for StreamDecoder {
    type Item = Result<(Datapoint, TimeUnit, Option<Bytes>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let item = self.decode_point();
        if item.is_err() {
            // A corrupt stream cannot be resynchronized.
            self.remaining = 0;
        }
        Some(item)
    }
}
