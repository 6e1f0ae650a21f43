//! Error types for buffer and tensor operations.

use shardps_core::CoreError;

use crate::shape::Shape;

/// Error types for tensor operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A structural mutation was attempted on a non-owning view.
    #[error("{op}: cannot mutate a view")]
    ViewMutation {
        /// The rejected operation.
        op: &'static str,
    },

    /// Shape mismatch error.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Shape,
        /// The actual shape.
        got: Shape,
    },

    /// The number of elements does not match.
    #[error("inconsistent total dim: {expected} vs {actual}")]
    SizeMismatch {
        /// The element count required by the destination.
        expected: usize,
        /// The element count that was supplied.
        actual: usize,
    },

    /// Invalid shape error.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A bounds-checked access was out of range.
    #[error("index {index} out of bounds (len: {len})")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The length of the buffer.
        len: usize,
    },

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CoreError),
}

/// Result type for tensor operations.
pub type TensorResult<T> = Result<T, TensorError>;
