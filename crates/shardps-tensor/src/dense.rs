//! Shape-tagged dense `f32` tensors.
//!
//! A [`DenseTensor`] pairs a [`Shape`] with an [`OwningOrViewBuffer`] of
//! `shape.total_dim()` values in row-major order. Like the buffer, a tensor
//! can be a view over memory it does not own, which is how pulled dense
//! parameters alias the server's storage or a receive buffer.

use std::borrow::Cow;

use shardps_core::codec::{Decode, DecodeView, Encode, Reader, Writer};
use shardps_core::CoreError;

use crate::buffer::OwningOrViewBuffer;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

/// A dense tensor of `f32` values.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTensor<'a> {
    shape: Shape,
    data: OwningOrViewBuffer<'a, f32>,
}

impl Default for DenseTensor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> DenseTensor<'a> {
    /// Creates an empty owning tensor of shape `(0)`.
    pub fn new() -> Self {
        Self {
            shape: Shape::vector(0),
            data: OwningOrViewBuffer::new(),
        }
    }

    /// Creates a zero-filled owning tensor.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if `shape` contains a wildcard.
    pub fn zeros(shape: Shape) -> TensorResult<Self> {
        let mut tensor = Self::new();
        tensor.resize(shape)?;
        Ok(tensor)
    }

    /// Creates an owning tensor that takes `data`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SizeMismatch`] if `data.len()` differs from
    /// the shape's element count.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> TensorResult<Self> {
        check_concrete(&shape)?;
        check_size(&shape, data.len())?;
        Ok(Self {
            shape,
            data: OwningOrViewBuffer::from_vec(data),
        })
    }

    /// Creates a tensor viewing `data` without copying.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SizeMismatch`] if `data.len()` differs from
    /// the shape's element count.
    pub fn from_view(shape: Shape, data: &'a [f32]) -> TensorResult<Self> {
        check_concrete(&shape)?;
        check_size(&shape, data.len())?;
        Ok(Self {
            shape,
            data: OwningOrViewBuffer::from_view(data),
        })
    }

    /// Returns the shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the element count.
    pub fn total_dim(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the tensor does not own its values.
    pub fn is_view(&self) -> bool {
        self.data.is_view()
    }

    /// Returns a pointer to the first value.
    pub fn as_ptr(&self) -> *const f32 {
        self.data.as_ptr()
    }

    /// Returns the values in row-major order.
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// Returns the values mutably.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ViewMutation`] if the tensor is a view.
    pub fn as_mut_slice(&mut self) -> TensorResult<&mut [f32]> {
        self.data.as_mut_slice()
    }

    /// Reallocates to `shape`, zero-filling every value.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ViewMutation`] if the tensor is a view and
    /// [`TensorError::InvalidShape`] if `shape` contains a wildcard.
    pub fn resize(&mut self, shape: Shape) -> TensorResult<()> {
        if self.data.is_view() {
            return Err(TensorError::ViewMutation { op: "resize" });
        }
        check_concrete(&shape)?;
        let len = shape.total_dim();
        self.data.clear();
        self.data.resize(len, 0.0)?;
        self.shape = shape;
        Ok(())
    }

    /// Becomes a view over `data` with `shape`, dropping any owned values.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SizeMismatch`] if `data.len()` differs from
    /// the shape's element count. The tensor is unchanged on failure.
    pub fn view(&mut self, shape: Shape, data: &'a [f32]) -> TensorResult<()> {
        check_concrete(&shape)?;
        check_size(&shape, data.len())?;
        self.shape = shape;
        self.data.view(data);
        Ok(())
    }

    /// Returns a view tensor aliasing this tensor's values.
    pub fn get_view(&self) -> DenseTensor<'_> {
        DenseTensor {
            shape: self.shape.clone(),
            data: self.data.get_view(),
        }
    }

    /// Overwrites every value with a copy of `values`.
    ///
    /// A view tensor becomes an owning tensor holding the copy; the memory
    /// it used to alias is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SizeMismatch`] if `values.len()` differs from
    /// [`total_dim`](Self::total_dim).
    pub fn set_data(&mut self, values: &[f32]) -> TensorResult<()> {
        if values.len() != self.data.len() {
            return Err(TensorError::SizeMismatch {
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        if self.data.is_view() {
            self.data.assign(values);
        } else {
            self.data.as_mut_slice()?.copy_from_slice(values);
        }
        Ok(())
    }

    /// Copies `other`'s values into this tensor, see [`set_data`](Self::set_data).
    pub fn set_from(&mut self, other: &DenseTensor<'_>) -> TensorResult<()> {
        self.set_data(other.as_slice())
    }

    /// Reshapes in place without touching the values.
    ///
    /// See [`Shape::reshape`] for wildcard handling.
    pub fn reshape(&mut self, target: &[i32]) -> TensorResult<()> {
        let shape = self.shape.reshape(target)?;
        check_size(&shape, self.data.len())?;
        self.shape = shape;
        Ok(())
    }

    /// Inserts a unit dimension at `axis`.
    pub fn expand_dim(&mut self, axis: i32) -> TensorResult<()> {
        self.shape = self.shape.expand_dim(axis)?;
        Ok(())
    }

    /// Removes the unit dimension at `axis`.
    pub fn squeeze(&mut self, axis: i32) -> TensorResult<()> {
        self.shape = self.shape.squeeze(axis)?;
        Ok(())
    }

    /// Sets every value to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ViewMutation`] if the tensor is a view.
    pub fn fill(&mut self, value: f32) -> TensorResult<()> {
        self.data.fill(value)
    }

    /// Sets every value to zero, see [`fill`](Self::fill).
    pub fn fill_zero(&mut self) -> TensorResult<()> {
        self.fill(0.0)
    }

    /// Returns `true` if every value is zero.
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Resets to an empty owning tensor of shape `(0)`.
    pub fn clear(&mut self) {
        self.shape = Shape::vector(0);
        self.data.clear();
    }

    /// Returns an owning tensor, copying the values if this is a view.
    pub fn into_owned(self) -> DenseTensor<'static> {
        DenseTensor {
            shape: self.shape,
            data: self.data.into_owned(),
        }
    }
}

fn check_concrete(shape: &Shape) -> TensorResult<()> {
    if !shape.is_concrete() {
        return Err(TensorError::InvalidShape(format!(
            "dense tensor shape {} has a wildcard dimension",
            shape
        )));
    }
    Ok(())
}

fn check_size(shape: &Shape, len: usize) -> TensorResult<()> {
    if shape.total_dim() != len {
        return Err(TensorError::SizeMismatch {
            expected: shape.total_dim(),
            actual: len,
        });
    }
    Ok(())
}

fn decode_shape(r: &mut Reader<'_>) -> shardps_core::Result<Shape> {
    let shape = Shape::decode(r)?;
    if !shape.is_concrete() {
        return Err(CoreError::invalid(format!(
            "dense tensor shape {} has a wildcard dimension",
            shape
        )));
    }
    Ok(shape)
}

// Layout: shape, then total_dim raw f32 values with no count prefix.
impl Encode for DenseTensor<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put(&self.shape);
        w.put_f32_raw(self.as_slice());
    }
}

impl Decode for DenseTensor<'static> {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        let shape = decode_shape(r)?;
        let values = r.read_f32_view(shape.total_dim())?;
        Ok(DenseTensor {
            shape,
            data: OwningOrViewBuffer::from_vec(values.into_owned()),
        })
    }
}

impl<'a> DecodeView<'a> for DenseTensor<'a> {
    fn decode_view(r: &mut Reader<'a>) -> shardps_core::Result<Self> {
        let shape = decode_shape(r)?;
        let data = match r.read_f32_view(shape.total_dim())? {
            Cow::Borrowed(values) => OwningOrViewBuffer::from_view(values),
            Cow::Owned(values) => OwningOrViewBuffer::from_vec(values),
        };
        Ok(DenseTensor { shape, data })
    }
}
