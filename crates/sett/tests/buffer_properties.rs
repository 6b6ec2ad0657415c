//! Property-based tests for the series write buffer.
//!
//! Encodes the buffer's core invariants over arbitrary write patterns:
//! admission bounds, duplicate idempotence, in-run monotonicity, merge
//! preservation, rotation correctness, and drain completeness.

use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sett::{
    BufferOptions, MultiReaderIterator, ReadContext, SeriesBuffer, StreamEncoder, TimeUnit,
    Timestamp,
};

// 2024-01-01T12:00:00Z, 2h-block aligned.
const NOON: Timestamp = 1_704_110_400_000_000_000;
const BLOCK: i64 = 2 * 60 * 60 * 1_000_000_000;
const MINUTE: i64 = 60 * 1_000_000_000;
const SECOND: i64 = 1_000_000_000;

type DrainLog = Arc<Mutex<Vec<(Timestamp, StreamEncoder)>>>;

fn harness() -> (Arc<AtomicI64>, DrainLog, SeriesBuffer) {
    let clock = Arc::new(AtomicI64::new(NOON));
    let clock_fn = Arc::clone(&clock);
    let drained: DrainLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&drained);
    let buffer = SeriesBuffer::new(
        Box::new(move |start, encoder| sink.lock().push((start, encoder))),
        BufferOptions::default()
            .with_clock(Arc::new(move || clock_fn.load(Ordering::Relaxed))),
    );
    (clock, drained, buffer)
}

fn read_all(buffer: &SeriesBuffer) -> Vec<(Timestamp, f64)> {
    let mut ctx = ReadContext::new();
    let groups = buffer.read_encoded(&mut ctx, i64::MIN, i64::MAX);
    let mut points = Vec::new();
    for readers in groups {
        for item in MultiReaderIterator::new(&readers) {
            let (dp, _, _) = item.expect("buffered stream should decode");
            points.push((dp.timestamp, dp.value));
        }
    }
    points
}

proptest! {
    /// A write succeeds iff its timestamp lies strictly inside
    /// `(now - buffer_past, now + buffer_future)`.
    #[test]
    fn prop_admission_bounds(offset_secs in -1800_i64..1800) {
        let (_, _, mut buffer) = harness();
        let timestamp = NOON + offset_secs * SECOND;

        let result = buffer.write(timestamp, 1.0, TimeUnit::Nanoseconds, None);
        let in_window =
            timestamp > NOON - 10 * MINUTE && timestamp < NOON + 10 * MINUTE;

        prop_assert_eq!(result.is_ok(), in_window);
        if let Err(err) = result {
            prop_assert!(err.is_invalid_params());
        }
    }

    /// Writing every datapoint twice reads back identically to writing it
    /// once.
    #[test]
    fn prop_duplicate_writes_are_idempotent(
        offsets in prop::collection::vec(0_i64..9 * 60, 1..50),
    ) {
        let (_, _, mut buffer) = harness();
        let (_, _, mut doubled) = harness();

        for (i, &offset) in offsets.iter().enumerate() {
            let timestamp = NOON + offset * SECOND;
            let value = i as f64;
            buffer.write(timestamp, value, TimeUnit::Nanoseconds, None).unwrap();
            doubled.write(timestamp, value, TimeUnit::Nanoseconds, None).unwrap();
            doubled.write(timestamp, value, TimeUnit::Nanoseconds, None).unwrap();
        }

        prop_assert_eq!(read_all(&buffer), read_all(&doubled));
    }

    /// Every run handed out by the read path decodes to strictly
    /// increasing timestamps, no matter how disordered the writes were.
    #[test]
    fn prop_runs_are_strictly_monotonic(
        offsets in prop::collection::vec(0_i64..9 * 60, 1..100),
    ) {
        let (_, _, mut buffer) = harness();
        for (i, &offset) in offsets.iter().enumerate() {
            buffer
                .write(NOON + offset * SECOND, i as f64, TimeUnit::Nanoseconds, None)
                .unwrap();
        }

        let mut ctx = ReadContext::new();
        let groups = buffer.read_encoded(&mut ctx, i64::MIN, i64::MAX);
        for readers in groups {
            for reader in readers {
                let mut previous = None;
                for item in MultiReaderIterator::new(&[reader]) {
                    let (dp, _, _) = item.unwrap();
                    if let Some(previous) = previous {
                        prop_assert!(dp.timestamp > previous);
                    }
                    previous = Some(dp.timestamp);
                }
            }
        }
    }

    /// A forced drain hands the sink exactly the accepted
    /// distinct-timestamp datapoints in order, first written value
    /// winning each timestamp.
    #[test]
    fn prop_merge_preserves_accepted_points(
        writes in prop::collection::vec((0_i64..9 * 60, -1000.0_f64..1000.0), 1..100),
    ) {
        let (_, drained, mut buffer) = harness();

        let mut expected: BTreeMap<Timestamp, f64> = BTreeMap::new();
        for &(offset, value) in &writes {
            let timestamp = NOON + offset * SECOND;
            buffer.write(timestamp, value, TimeUnit::Nanoseconds, None).unwrap();
            expected.entry(timestamp).or_insert(value);
        }

        buffer.drain_and_reset(true);

        let drained = drained.lock();
        prop_assert_eq!(drained.len(), 1);
        let (start, encoder) = &drained[0];
        prop_assert_eq!(*start, NOON);
        prop_assert!(encoder.is_sealed());

        let reader = encoder.stream().expect("drained bucket holds data");
        let merged: Vec<(Timestamp, f64)> = MultiReaderIterator::new(&[reader])
            .map(|item| {
                let (dp, _, _) = item.unwrap();
                (dp.timestamp, dp.value)
            })
            .collect();
        let expected: Vec<(Timestamp, f64)> = expected.into_iter().collect();
        prop_assert_eq!(merged, expected);
    }

    /// After a successful write there is exactly one bucket bound to the
    /// timestamp's window, and it contains the point.
    #[test]
    fn prop_rotation_places_writes(offset_secs in -9 * 60_i64..9 * 60) {
        let (_, _, mut buffer) = harness();
        let timestamp = NOON + offset_secs * SECOND;
        buffer.write(timestamp, 4.2, TimeUnit::Nanoseconds, None).unwrap();

        let window = timestamp.div_euclid(BLOCK) * BLOCK;
        let mut ctx = ReadContext::new();
        let blocks = buffer.fetch_blocks(&mut ctx, &[window]);
        prop_assert_eq!(blocks.len(), 1);
        prop_assert_eq!(blocks[0].start, window);

        let found = MultiReaderIterator::new(&blocks[0].readers)
            .map(|item| item.unwrap().0.timestamp)
            .any(|ts| ts == timestamp);
        prop_assert!(found);
    }

    /// A forced drain hands every dirty window to the sink exactly once
    /// and leaves the buffer empty, and drained data never reappears on
    /// the read path.
    #[test]
    fn prop_forced_drain_is_complete(
        offsets in prop::collection::vec(-9 * 60_i64..9 * 60, 1..60),
    ) {
        let (_, drained, mut buffer) = harness();

        let mut dirty_windows: Vec<Timestamp> = Vec::new();
        for (i, &offset) in offsets.iter().enumerate() {
            let timestamp = NOON + offset * SECOND;
            buffer.write(timestamp, i as f64, TimeUnit::Nanoseconds, None).unwrap();
            let window = timestamp.div_euclid(BLOCK) * BLOCK;
            if !dirty_windows.contains(&window) {
                dirty_windows.push(window);
            }
        }
        dirty_windows.sort_unstable();

        buffer.drain_and_reset(true);

        let drained = drained.lock();
        let drained_windows: Vec<Timestamp> =
            drained.iter().map(|(start, _)| *start).collect();
        prop_assert_eq!(drained_windows, dirty_windows);
        prop_assert!(buffer.is_empty());
        prop_assert_eq!(read_all(&buffer), Vec::new());
    }
}
