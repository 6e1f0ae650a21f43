//! Shape utilities for tensor dimensions.
//!
//! This module provides the [`Shape`] type for representing tensor dimensions
//! along with the NumPy-style helpers used when shapes are inferred:
//! [`Shape::reshape`], [`Shape::expand_dim`] and [`Shape::squeeze`].
//!
//! A dimension may be [`DIM_ANY`], a wildcard that a later reshape resolves
//! from the remaining dimensions. Shapes have at most [`MAX_RANK`] dimensions.

use std::fmt;
use std::ops::{Deref, Index};

use shardps_core::codec::{Decode, Encode, Reader, Writer};
use shardps_core::CoreError;

use crate::error::{TensorError, TensorResult};

/// Wildcard dimension.
pub const DIM_ANY: i32 = -1;

/// Maximum number of dimensions.
pub const MAX_RANK: usize = 8;

/// Represents the shape (dimensions) of a tensor.
///
/// # Examples
///
/// ```
/// use shardps_tensor::Shape;
///
/// let shape = Shape::new(vec![2, 3, 4]);
/// assert_eq!(shape.rank(), 3);
/// assert_eq!(shape.total_dim(), 24);
/// assert_eq!(shape[0], 2);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<i32>,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    ///
    /// # Panics
    ///
    /// Panics if there are more than [`MAX_RANK`] dimensions or a dimension
    /// is negative and not [`DIM_ANY`]. Use [`Shape::try_new`] for untrusted
    /// input.
    pub fn new(dims: Vec<i32>) -> Self {
        match Self::try_new(dims) {
            Ok(shape) => shape,
            Err(e) => panic!("{}", e),
        }
    }

    /// Creates a new shape, validating rank and dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the rank exceeds [`MAX_RANK`],
    /// a dimension is below [`DIM_ANY`], or the product of the dimensions
    /// does not fit in an `i32`.
    pub fn try_new(dims: Vec<i32>) -> TensorResult<Self> {
        if dims.len() > MAX_RANK {
            return Err(TensorError::InvalidShape(format!(
                "rank {} exceeds the maximum of {}",
                dims.len(),
                MAX_RANK
            )));
        }
        if let Some(&bad) = dims.iter().find(|&&d| d < DIM_ANY) {
            return Err(TensorError::InvalidShape(format!(
                "invalid dimension {}",
                bad
            )));
        }
        let shape = Self { dims };
        if shape.wire_total().is_none() {
            return Err(TensorError::InvalidShape(format!(
                "total dim of {} overflows i32",
                shape
            )));
        }
        Ok(shape)
    }

    /// Creates a scalar shape (zero dimensions, one element).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1D shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use shardps_tensor::Shape;
    ///
    /// let shape = Shape::vector(5);
    /// assert_eq!(shape.rank(), 1);
    /// assert_eq!(shape.total_dim(), 5);
    /// ```
    pub fn vector(len: i32) -> Self {
        Self::new(vec![len])
    }

    /// Creates a 2D shape.
    pub fn matrix(rows: i32, cols: i32) -> Self {
        Self::new(vec![rows, cols])
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns dimension `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= rank()`.
    pub fn dim(&self, i: usize) -> i32 {
        self.dims[i]
    }

    /// Returns the dimensions as a slice.
    pub fn as_slice(&self) -> &[i32] {
        &self.dims
    }

    /// Returns the number of [`DIM_ANY`] dimensions.
    pub fn num_any(&self) -> usize {
        self.dims.iter().filter(|&&d| d == DIM_ANY).count()
    }

    /// Returns `true` if no dimension is a wildcard.
    pub fn is_concrete(&self) -> bool {
        self.num_any() == 0
    }

    /// Returns the product of the known dimensions.
    ///
    /// For a concrete shape this is the element count. Wildcards are skipped.
    /// Every constructed shape keeps this within `i32::MAX`.
    pub fn total_dim(&self) -> usize {
        self.dims
            .iter()
            .filter(|&&d| d != DIM_ANY)
            .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
            .unwrap_or(usize::MAX)
    }

    /// Returns the product of all dimensions with wildcards counted as `-1`,
    /// or `None` if it overflows.
    pub fn checked_total(&self) -> Option<i64> {
        self.dims
            .iter()
            .try_fold(1i64, |acc, &d| acc.checked_mul(i64::from(d)))
    }

    fn wire_total(&self) -> Option<i32> {
        self.checked_total().and_then(|t| i32::try_from(t).ok())
    }

    /// Returns `true` if both shapes have the same dimensions.
    pub fn same_shape(&self, other: &Shape) -> bool {
        self.dims == other.dims
    }

    /// Reshapes to `target`, solving at most one wildcard.
    ///
    /// # Arguments
    ///
    /// * `target` - The new dimensions, optionally containing one [`DIM_ANY`].
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if either side holds more than
    /// one wildcard, both sides hold one, a wildcard cannot be solved evenly,
    /// or the element counts differ.
    ///
    /// # Examples
    ///
    /// ```
    /// use shardps_tensor::{Shape, DIM_ANY};
    ///
    /// let shape = Shape::matrix(4, 6);
    /// let reshaped = shape.reshape(&[3, DIM_ANY]).unwrap();
    /// assert_eq!(reshaped.as_slice(), &[3, 8]);
    /// assert!(shape.reshape(&[5, DIM_ANY]).is_err());
    /// ```
    pub fn reshape(&self, target: &[i32]) -> TensorResult<Shape> {
        let other = Shape::try_new(target.to_vec())?;
        let fail = || {
            TensorError::InvalidShape(format!("couldn't reshape from {} to {}", self, other))
        };

        match (self.num_any(), other.num_any()) {
            (0, 0) => {
                if self.total_dim() != other.total_dim() {
                    return Err(fail());
                }
                Ok(other)
            }
            (0, 1) => {
                let total = self.total_dim();
                let known = other.total_dim();
                if total == 0 || known == 0 || total % known != 0 {
                    return Err(fail());
                }
                let solved = i32::try_from(total / known).map_err(|_| fail())?;
                let dims = other
                    .dims
                    .iter()
                    .map(|&d| if d == DIM_ANY { solved } else { d })
                    .collect();
                Ok(Shape { dims })
            }
            (1, 0) => {
                let known = self.total_dim();
                if known == 0 || other.total_dim() % known != 0 {
                    return Err(fail());
                }
                Ok(other)
            }
            _ => Err(fail()),
        }
    }

    /// Inserts a dimension of size 1 at `axis`.
    ///
    /// Negative axes count from the end of the resulting shape.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the rank is already
    /// [`MAX_RANK`] or `axis` is out of range.
    pub fn expand_dim(&self, axis: i32) -> TensorResult<Shape> {
        if self.rank() == MAX_RANK {
            return Err(TensorError::InvalidShape(format!(
                "couldn't expand_dim {} by {}",
                self, axis
            )));
        }
        let axis = real_axis(axis, self.rank() + 1).ok_or_else(|| {
            TensorError::InvalidShape(format!("couldn't expand_dim {} by {}", self, axis))
        })?;
        let mut dims = self.dims.clone();
        dims.insert(axis, 1);
        Ok(Shape { dims })
    }

    /// Removes the dimension at `axis`, which must be 1.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if `axis` is out of range or the
    /// dimension is not 1.
    pub fn squeeze(&self, axis: i32) -> TensorResult<Shape> {
        let fail =
            || TensorError::InvalidShape(format!("couldn't squeeze {} by {}", self, axis));
        let axis = real_axis(axis, self.rank()).ok_or_else(fail)?;
        if self.dims[axis] != 1 {
            return Err(fail());
        }
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Ok(Shape { dims })
    }
}

fn real_axis(axis: i32, rank: usize) -> Option<usize> {
    let rank = rank as i32;
    if axis >= rank || axis < -rank {
        return None;
    }
    let axis = if axis < 0 { axis + rank } else { axis };
    Some(axis as usize)
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, ")")
    }
}

impl Deref for Shape {
    type Target = [i32];

    fn deref(&self) -> &Self::Target {
        &self.dims
    }
}

impl Index<usize> for Shape {
    type Output = i32;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

impl From<Vec<i32>> for Shape {
    fn from(dims: Vec<i32>) -> Self {
        Self::new(dims)
    }
}

impl From<&[i32]> for Shape {
    fn from(dims: &[i32]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for Shape {
    fn from(dims: [i32; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

// Layout: i32 rank, i32 total_dim, i32 dims[MAX_RANK] (unused slots zero).
impl Encode for Shape {
    fn encode(&self, w: &mut Writer) {
        // Rank is at most MAX_RANK and try_new bounds the total.
        w.put_i32(self.rank() as i32);
        w.put_i32(self.wire_total().unwrap_or(i32::MAX));
        for i in 0..MAX_RANK {
            w.put_i32(self.dims.get(i).copied().unwrap_or(0));
        }
    }
}

impl Decode for Shape {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        let rank = r.read_i32()?;
        let total = r.read_i32()?;
        let mut slots = [0i32; MAX_RANK];
        for slot in &mut slots {
            *slot = r.read_i32()?;
        }
        if rank < 0 || rank as usize > MAX_RANK {
            return Err(CoreError::invalid(format!("shape rank {}", rank)));
        }
        let shape = Shape::try_new(slots[..rank as usize].to_vec())
            .map_err(|e| CoreError::invalid(e.to_string()))?;
        // A rank-0 shape is written with total 0 or 1 depending on the writer.
        if rank > 0 && shape.checked_total() != Some(i64::from(total)) {
            return Err(CoreError::invalid(format!(
                "shape {} has total dim {}",
                shape, total
            )));
        }
        Ok(shape)
    }
}
