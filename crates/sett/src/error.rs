//! Error and Result types for buffer operations.

use crate::time::Timestamp;
use thiserror::Error;

/// A convenience `Result` type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;

/// The error type for write buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Datapoint timestamp is at or beyond the future admission limit.
    #[error("datapoint at {timestamp} is too far in the future (limit {future_limit})")]
    TooFuture {
        /// Timestamp of the rejected datapoint, in nanoseconds.
        timestamp: Timestamp,
        /// Exclusive upper admission bound at the time of the write.
        future_limit: Timestamp,
    },

    /// Datapoint timestamp is at or beyond the past admission limit.
    #[error("datapoint at {timestamp} is too far in the past (limit {past_limit})")]
    TooPast {
        /// Timestamp of the rejected datapoint, in nanoseconds.
        timestamp: Timestamp,
        /// Exclusive lower admission bound at the time of the write.
        past_limit: Timestamp,
    },

    /// Write attempted against an encoder that has been sealed.
    #[error("encoder is sealed and cannot accept further writes")]
    EncoderSealed,

    /// Annotation payload exceeds the encodable length.
    #[error("annotation of {len} bytes exceeds the {max} byte limit")]
    AnnotationTooLarge {
        /// Length of the rejected annotation.
        len: usize,
        /// Maximum encodable annotation length.
        max: usize,
    },

    /// Encoded stream could not be decoded.
    #[error("corrupt encoded stream: {0}")]
    CorruptStream(String),
}

impl BufferError {
    /// True when the error is an admission rejection rather than a fault.
    ///
    /// Admission rejections do not mutate buffer state; the caller may
    /// retry with a corrected timestamp or drop the datapoint.
    pub fn is_invalid_params(&self) -> bool {
        matches!(
            self,
            BufferError::TooFuture { .. } | BufferError::TooPast { .. }
        )
    }
}
