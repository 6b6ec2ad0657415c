//! Merge-sorted iteration across multiple encoded streams.

use crate::encoding::{Datapoint, SegmentReader, StreamDecoder};
use crate::error::Result;
use crate::time::TimeUnit;
use bytes::Bytes;

type DecodedPoint = (Datapoint, TimeUnit, Option<Bytes>);

#[derive(Debug)]
struct PeekedStream {
    decoder: StreamDecoder,
    head: Option<Result<DecodedPoint>>,
}

impl PeekedStream {
    fn head_timestamp(&self) -> Option<i64> {
        match &self.head {
            Some(Ok((dp, _, _))) => Some(dp.timestamp),
            _ => None,
        }
    }
}

/// K-way merging iterator over encoded streams.
///
/// Emits datapoints in strict timestamp order. When the same timestamp
/// appears in more than one stream, the earliest stream wins and the
/// duplicates are dropped. Stream counts are small (one per ordered run
/// in a bucket), so the merge is a linear scan over peeked heads rather
/// than a heap.
///
/// Iterators are reusable through [`reset`](MultiReaderIterator::reset)
/// and are typically recycled via a
/// [`MultiReaderIteratorPool`](crate::encoding::MultiReaderIteratorPool).
#[derive(Debug, Default)]
pub struct MultiReaderIterator {
    streams: Vec<PeekedStream>,
}

impl MultiReaderIterator {
    /// Creates an iterator over the given stream readers.
    pub fn new(readers: &[SegmentReader]) -> Self {
        let mut iter = Self::default();
        iter.reset(readers);
        iter
    }

    /// Rebinds the iterator to a new set of stream readers.
    pub fn reset(&mut self, readers: &[SegmentReader]) {
        self.streams.clear();
        for reader in readers {
            let mut decoder = StreamDecoder::new(reader);
            let head = decoder.next();
            self.streams.push(PeekedStream { decoder, head });
        }
    }

    /// Releases all stream state.
    pub fn close(&mut self) {
        self.streams.clear();
    }
}

impl Iterator for MultiReaderIterator {
    type Item = Result<DecodedPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        // Decode failures poison the whole merge: emit the error once and
        // terminate.
        if let Some(idx) = self
            .streams
            .iter()
            .position(|s| matches!(s.head, Some(Err(_))))
        {
            let err = self.streams[idx].head.take();
            self.streams.clear();
            return err;
        }

        let mut min_idx = None;
        let mut min_ts = i64::MAX;
        for (idx, stream) in self.streams.iter().enumerate() {
            if let Some(ts) = stream.head_timestamp() {
                if min_idx.is_none() || ts < min_ts {
                    min_idx = Some(idx);
                    min_ts = ts;
                }
            }
        }
        let min_idx = min_idx?;

        let item = self.streams[min_idx].head.take();
        self.streams[min_idx].head = self.streams[min_idx].decoder.next();

        // Coalesce the winning timestamp out of every other stream.
        for stream in &mut self.streams {
            while stream.head_timestamp() == Some(min_ts) {
                stream.head = stream.decoder.next();
            }
        }

        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::StreamEncoder;

    fn encode_run(points: &[(i64, f64)]) -> SegmentReader {
        let mut encoder = StreamEncoder::new();
        encoder.reset(0, 64);
        for &(ts, value) in points {
            encoder
                .encode(Datapoint::new(ts, value), TimeUnit::Nanoseconds, None)
                .unwrap();
        }
        encoder.stream().unwrap()
    }

    fn merge_timestamps(readers: &[SegmentReader]) -> Vec<(i64, f64)> {
        MultiReaderIterator::new(readers)
            .map(|item| {
                let (dp, _, _) = item.unwrap();
                (dp.timestamp, dp.value)
            })
            .collect()
    }

    #[test]
    fn test_single_stream_passthrough() {
        let reader = encode_run(&[(10, 1.0), (20, 2.0), (30, 3.0)]);
        assert_eq!(
            merge_timestamps(&[reader]),
            vec![(10, 1.0), (20, 2.0), (30, 3.0)]
        );
    }

    #[test]
    fn test_interleaved_streams_merge_in_order() {
        let a = encode_run(&[(10, 1.0), (30, 3.0), (50, 5.0)]);
        let b = encode_run(&[(20, 2.0), (40, 4.0)]);
        assert_eq!(
            merge_timestamps(&[a, b]),
            vec![(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0), (50, 5.0)]
        );
    }

    #[test]
    fn test_duplicate_timestamps_coalesced() {
        let a = encode_run(&[(10, 1.0), (20, 2.0)]);
        let b = encode_run(&[(20, 9.0), (30, 3.0)]);
        // The earliest stream wins the duplicate at t=20.
        assert_eq!(
            merge_timestamps(&[a, b]),
            vec![(10, 1.0), (20, 2.0), (30, 3.0)]
        );
    }

    #[test]
    fn test_empty_reader_set() {
        let mut iter = MultiReaderIterator::new(&[]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_reset_reuses_iterator() {
        let a = encode_run(&[(10, 1.0)]);
        let mut iter = MultiReaderIterator::new(&[a]);
        assert_eq!(iter.by_ref().count(), 1);

        let b = encode_run(&[(40, 4.0), (50, 5.0)]);
        iter.reset(&[b]);
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_three_way_merge_with_overlap() {
        let a = encode_run(&[(10, 1.0), (40, 4.0)]);
        let b = encode_run(&[(20, 2.0), (40, 4.5)]);
        let c = encode_run(&[(30, 3.0), (60, 6.0)]);
        assert_eq!(
            merge_timestamps(&[a, b, c]),
            vec![(10, 1.0), (20, 2.0), (30, 3.0), (40, 4.0), (60, 6.0)]
        );
    }
}
