//! Core types shared by the shardps parameter-server crates.
//!
//! This crate provides the foundations the storage and network layers are
//! built on:
//!
//! - **Binary codec**: [`codec::Writer`] and [`codec::Reader`] implement the
//!   host-byte-order sequential format used on the wire and on disk.
//! - **Hashing**: MurmurHash64A for tensor names and the MurmurHash3
//!   finalizer for row ids.
//! - **Configuration types**: [`params::InitializerConfig`].
//! - **Error types**: [`CoreError`].
//!
//! # Example
//!
//! ```
//! use shardps_core::codec::{Reader, Writer};
//!
//! let mut w = Writer::new();
//! w.put_i32(14).put(&String::from("emb"));
//!
//! let mut r = Reader::new(w.as_slice());
//! assert_eq!(r.read_i32().unwrap(), 14);
//! assert_eq!(r.get::<String>().unwrap(), "emb");
//! assert!(r.finish().is_ok());
//! ```

pub mod codec;
pub mod error;
pub mod hash;
pub mod params;

pub use codec::{Decode, DecodeView, Encode, Reader, Writer};
pub use error::{CoreError, Result};
pub use params::InitializerConfig;

/// Identifier of a sparse parameter row, typically a hashed feature id.
pub type RowId = u64;
