//! Owning-or-view buffers and dense tensors for shardps.
//!
//! This crate provides the storage primitives that let pulled parameters
//! alias memory they do not own instead of copying it.
//!
//! # Overview
//!
//! - [`OwningOrViewBuffer`]: a sequence that either owns a `Vec<T>` or borrows
//!   a slice for a lifetime `'a`. Structural mutation of a view is rejected.
//! - [`Shape`]: up to eight `i32` dimensions, with [`shape::DIM_ANY`]
//!   wildcards resolved by reshapes.
//! - [`DenseTensor`]: a shape plus an `f32` buffer of matching length.
//!
//! # Example
//!
//! ```rust
//! use shardps_tensor::{DenseTensor, Shape};
//!
//! let owner = DenseTensor::from_vec(Shape::matrix(2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//!
//! // A view aliases the owner's memory.
//! let view = owner.get_view();
//! assert!(view.is_view());
//! assert_eq!(view.as_ptr(), owner.as_ptr());
//!
//! // Copying values out of a view yields an independent owner.
//! let copy = view.into_owned();
//! assert!(!copy.is_view());
//! assert_eq!(copy.as_slice(), &[1.0, 2.0, 3.0, 4.0]);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod buffer;
pub mod dense;
pub mod error;
pub mod shape;

// Re-exports for convenience
pub use buffer::OwningOrViewBuffer;
pub use dense::DenseTensor;
pub use error::{TensorError, TensorResult};
pub use shape::{Shape, DIM_ANY, MAX_RANK};
