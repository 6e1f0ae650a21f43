//! Error types for hash table and sparse store operations.

use shardps_core::CoreError;
use shardps_tensor::TensorError;
use thiserror::Error;

/// Errors that can occur during hash table operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HashTableError {
    /// The requested key was not found in the table.
    #[error("key {key} not found")]
    KeyNotFound {
        /// The key that was not found, formatted for display.
        key: String,
    },

    /// A row does not have the store's column width.
    #[error("inconsistent column width: expected {expected}, got {actual}")]
    InconsistentColumnWidth {
        /// The store's column width.
        expected: usize,
        /// The width that was supplied.
        actual: usize,
    },

    /// The initializer cannot be applied to the requested shape.
    #[error("initializer {initializer}: {message}")]
    UnsupportedInitializer {
        /// Name of the initializer.
        initializer: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// A buffer or tensor operation failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Decoding or configuration validation failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A specialized Result type for hash table operations.
pub type Result<T> = std::result::Result<T, HashTableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HashTableError::InconsistentColumnWidth {
            expected: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "inconsistent column width: expected 8, got 4");

        let err = HashTableError::KeyNotFound {
            key: "42".to_string(),
        };
        assert_eq!(err.to_string(), "key 42 not found");
    }

    #[test]
    fn test_error_from_lower_layers() {
        let err: HashTableError = CoreError::config("bad range").into();
        assert!(matches!(err, HashTableError::Core(CoreError::ConfigValidation { .. })));

        let err: HashTableError = TensorError::ViewMutation { op: "push" }.into();
        assert_eq!(err.to_string(), "push: cannot mutate a view");
    }
}
