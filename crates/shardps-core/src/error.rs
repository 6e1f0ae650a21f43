//! Error types for the shardps core library.
//!
//! This module defines the errors raised by the binary codec and by
//! configuration validation. Higher layers wrap [`CoreError`] with `#[from]`.

use thiserror::Error;

/// The main error type for shardps-core operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// The input ended before a value could be fully decoded.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Number of bytes the decoder needed.
        needed: usize,
        /// Number of bytes left in the input.
        remaining: usize,
    },

    /// A value decoded successfully but bytes were left over.
    #[error("trailing bytes after decode: {remaining}")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// A length or count prefix does not fit in memory on this host.
    #[error("length prefix {length} is out of range")]
    LengthOverflow {
        /// The offending length prefix.
        length: u64,
    },

    /// A string field held invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// A tag or discriminant was not recognized.
    #[error("unknown {kind} tag: {tag}")]
    UnknownTag {
        /// What kind of tag was being decoded.
        kind: &'static str,
        /// The tag value that was read.
        tag: i64,
    },

    /// A decoded value violated a structural invariant.
    #[error("invalid encoded value: {message}")]
    InvalidValue {
        /// A description of the violation.
        message: String,
    },

    /// A configuration value was rejected at validation time.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// A description of why the configuration is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration validation error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Returns `true` if this error came from decoding a byte stream.
    pub fn is_decode(&self) -> bool {
        !matches!(self, Self::ConfigValidation { .. })
    }
}

/// A specialized Result type for shardps-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnexpectedEof {
            needed: 8,
            remaining: 3,
        };
        assert_eq!(
            err.to_string(),
            "unexpected end of input: needed 8 bytes, 3 remaining"
        );

        let err = CoreError::UnknownTag {
            kind: "tensor type",
            tag: 42,
        };
        assert_eq!(err.to_string(), "unknown tensor type tag: 42");

        let err = CoreError::config("min > max");
        assert_eq!(err.to_string(), "invalid configuration: min > max");
    }

    #[test]
    fn test_is_decode() {
        assert!(CoreError::InvalidUtf8.is_decode());
        assert!(CoreError::TrailingBytes { remaining: 1 }.is_decode());
        assert!(!CoreError::config("bad").is_decode());
    }
}
