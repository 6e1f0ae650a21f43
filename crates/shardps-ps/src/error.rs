//! Error types for the parameter table and the network layer.

use std::path::PathBuf;

use shardps_core::CoreError;
use shardps_hash_table::HashTableError;
use shardps_tensor::TensorError;
use thiserror::Error;

/// Errors that can occur in parameter-server operations.
#[derive(Debug, Error)]
pub enum PsError {
    /// A socket operation failed. The connection has been closed.
    #[error("connection to {endpoint} failed: {message}")]
    ConnectionFailed {
        /// The peer address.
        endpoint: String,
        /// The OS error text or a description of the failure.
        message: String,
    },

    /// A complete frame arrived but its payload did not decode. The
    /// connection has been closed.
    #[error("failed to decode message from {endpoint}: {source}")]
    ProtocolDecode {
        /// The peer address.
        endpoint: String,
        /// The underlying decode error.
        #[source]
        source: CoreError,
    },

    /// A file could not be read or written.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No complete checkpoint exists at this path.
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    /// A parameter is missing or inconsistent with its declaration.
    #[error("parameter {name} failed the init check: {message}")]
    InitCheckFailed {
        /// Name of the parameter.
        name: String,
        /// What was expected and what was found.
        message: String,
    },

    /// No tensor with this name is stored.
    #[error("tensor {name} not found")]
    TensorNotFound {
        /// The requested name.
        name: String,
    },

    /// A tensor exists under this name but has the other kind.
    #[error("tensor {name} is not {expected}")]
    WrongTensorKind {
        /// The requested name.
        name: String,
        /// The kind the caller asked for.
        expected: &'static str,
    },

    /// A persisted table carries a version this build cannot read.
    #[error("unsupported parameter table version {version}")]
    UnsupportedVersion {
        /// The version word that was read.
        version: i32,
    },

    /// A shard function name is not registered, or registered twice.
    #[error("shard function {name}: {message}")]
    ShardFunc {
        /// The shard function name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// A configuration value was rejected.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Why the configuration is invalid.
        message: String,
    },

    /// A sparse store operation failed.
    #[error(transparent)]
    HashTable(#[from] HashTableError),

    /// A dense tensor operation failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Decoding a buffer that did not come off a connection failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl PsError {
    /// Creates a configuration validation error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Returns `true` if the error closed a connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ProtocolDecode { .. }
        )
    }
}

/// A specialized Result type for parameter-server operations.
pub type Result<T> = std::result::Result<T, PsError>;
