//! Shared object pools for the hot write path.
//!
//! A write buffer exists per series and a process hosts very many series,
//! so encoders and merge iterators are pooled rather than allocated per
//! bucket rotation. Pools are internally synchronized and shared across
//! series via `Arc`; the buffers themselves remain externally serialized.

use crate::encoding::{MultiReaderIterator, StreamEncoder};
use parking_lot::Mutex;

/// Free-list pool of [`StreamEncoder`]s.
#[derive(Debug, Default)]
pub struct EncoderPool {
    free: Mutex<Vec<StreamEncoder>>,
}

impl EncoderPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an encoder from the pool, allocating when the pool is empty.
    ///
    /// The returned encoder is unbound; callers must
    /// [`reset`](StreamEncoder::reset) it before encoding.
    pub fn get(&self) -> StreamEncoder {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Returns an encoder to the pool, clearing its state while keeping
    /// its buffer capacity.
    pub fn put(&self, mut encoder: StreamEncoder) {
        encoder.reset(0, 0);
        self.free.lock().push(encoder);
    }

    /// Number of idle encoders currently pooled.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// Free-list pool of [`MultiReaderIterator`]s.
#[derive(Debug, Default)]
pub struct MultiReaderIteratorPool {
    free: Mutex<Vec<MultiReaderIterator>>,
}

impl MultiReaderIteratorPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an iterator from the pool, allocating when the pool is empty.
    pub fn get(&self) -> MultiReaderIterator {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Returns an iterator to the pool.
    pub fn put(&self, mut iterator: MultiReaderIterator) {
        iterator.close();
        self.free.lock().push(iterator);
    }

    /// Number of idle iterators currently pooled.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Datapoint;
    use crate::time::TimeUnit;

    #[test]
    fn test_encoder_pool_recycles() {
        let pool = EncoderPool::new();
        assert_eq!(pool.idle(), 0);

        let mut encoder = pool.get();
        encoder.reset(0, 64);
        encoder
            .encode(Datapoint::new(1000, 1.0), TimeUnit::Seconds, None)
            .unwrap();
        encoder.close(&pool);
        assert_eq!(pool.idle(), 1);

        // The recycled encoder comes back cleared.
        let encoder = pool.get();
        assert_eq!(pool.idle(), 0);
        assert!(encoder.is_empty());
        assert!(!encoder.is_sealed());
    }

    #[test]
    fn test_sealed_encoder_usable_after_recycle() {
        let pool = EncoderPool::new();
        let mut encoder = pool.get();
        encoder.reset(0, 64);
        encoder
            .encode(Datapoint::new(1000, 1.0), TimeUnit::Seconds, None)
            .unwrap();
        encoder.seal();
        pool.put(encoder);

        let mut encoder = pool.get();
        encoder.reset(7200, 64);
        encoder
            .encode(Datapoint::new(7200, 2.0), TimeUnit::Seconds, None)
            .unwrap();
        assert_eq!(encoder.count(), 1);
    }

    #[test]
    fn test_iterator_pool_recycles() {
        let pool = MultiReaderIteratorPool::new();
        let iterator = pool.get();
        pool.put(iterator);
        assert_eq!(pool.idle(), 1);
    }
}
