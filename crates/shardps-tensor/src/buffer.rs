//! Owning-or-view sequence buffers.
//!
//! An [`OwningOrViewBuffer`] either owns a growable `Vec<T>` or borrows a
//! slice of memory owned by someone else, typically a network receive buffer
//! that a pull response was decoded from. The borrow is tracked by the
//! lifetime `'a`, so a view can never outlive the memory it aliases.
//!
//! While a buffer is a view, every structural mutation (`push`, `pop`,
//! `insert`, `remove`, `resize`, `reserve`, `shrink_to_fit`, element writes)
//! fails with [`TensorError::ViewMutation`]. Whole-buffer replacement through
//! [`assign`](OwningOrViewBuffer::assign), [`view`](OwningOrViewBuffer::view)
//! and [`clear`](OwningOrViewBuffer::clear) is always allowed.
//!
//! # Example
//!
//! ```
//! use shardps_tensor::OwningOrViewBuffer;
//!
//! let backing = vec![1.0f32, 2.0, 3.0];
//! let mut buf = OwningOrViewBuffer::from_view(&backing);
//! assert!(buf.is_view());
//! assert!(buf.push(4.0).is_err());
//!
//! buf.assign(&[5.0, 6.0]);
//! assert!(!buf.is_view());
//! buf.push(7.0).unwrap();
//! assert_eq!(buf.as_slice(), &[5.0, 6.0, 7.0]);
//! ```

use std::fmt;
use std::ops::Deref;

use crate::error::{TensorError, TensorResult};

enum Storage<'a, T> {
    Owned(Vec<T>),
    View(&'a [T]),
}

/// A sequence that is either self-owned or a view over borrowed memory.
pub struct OwningOrViewBuffer<'a, T> {
    storage: Storage<'a, T>,
}

impl<'a, T> OwningOrViewBuffer<'a, T> {
    /// Creates an empty owning buffer.
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(Vec::new()),
        }
    }

    /// Creates an empty owning buffer with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Storage::Owned(Vec::with_capacity(capacity)),
        }
    }

    /// Creates an owning buffer that takes `data`.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            storage: Storage::Owned(data),
        }
    }

    /// Creates a view over `data`. No copy is made.
    pub fn from_view(data: &'a [T]) -> Self {
        Self {
            storage: Storage::View(data),
        }
    }

    /// Returns `true` if this buffer does not own its memory.
    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View(_))
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns `true` if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the owned capacity, or the length for a view.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Owned(v) => v.capacity(),
            Storage::View(s) => s.len(),
        }
    }

    /// Returns the elements.
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Storage::Owned(v) => v.as_slice(),
            Storage::View(s) => s,
        }
    }

    /// Returns a pointer to the first element.
    ///
    /// Two buffers that alias the same memory return the same pointer.
    pub fn as_ptr(&self) -> *const T {
        self.as_slice().as_ptr()
    }

    /// Returns the elements mutably.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ViewMutation`] if this buffer is a view.
    pub fn as_mut_slice(&mut self) -> TensorResult<&mut [T]> {
        Ok(self.owned_mut("as_mut_slice")?.as_mut_slice())
    }

    /// Bounds-checked element access.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::IndexOutOfBounds`] if `index >= len()`.
    pub fn at(&self, index: usize) -> TensorResult<&T> {
        let data = self.as_slice();
        data.get(index).ok_or(TensorError::IndexOutOfBounds {
            index,
            len: data.len(),
        })
    }

    /// Switches to a view over `data`, releasing any owned storage.
    pub fn view(&mut self, data: &'a [T]) {
        self.storage = Storage::View(data);
    }

    /// Returns a new view aliasing this buffer's current data.
    ///
    /// This never allocates, whether `self` owns its memory or not.
    pub fn get_view(&self) -> OwningOrViewBuffer<'_, T> {
        OwningOrViewBuffer::from_view(self.as_slice())
    }

    /// Replaces the contents with `data`, becoming an owning buffer.
    pub fn assign_vec(&mut self, data: Vec<T>) {
        self.storage = Storage::Owned(data);
    }

    /// Removes every element, becoming an empty owning buffer.
    pub fn clear(&mut self) {
        match &mut self.storage {
            Storage::Owned(v) => v.clear(),
            Storage::View(_) => self.storage = Storage::Owned(Vec::new()),
        }
    }

    /// Appends an element.
    pub fn push(&mut self, value: T) -> TensorResult<()> {
        self.owned_mut("push")?.push(value);
        Ok(())
    }

    /// Removes and returns the last element.
    pub fn pop(&mut self) -> TensorResult<Option<T>> {
        Ok(self.owned_mut("pop")?.pop())
    }

    /// Inserts an element at `index`, shifting later elements.
    pub fn insert(&mut self, index: usize, value: T) -> TensorResult<()> {
        let v = self.owned_mut("insert")?;
        if index > v.len() {
            return Err(TensorError::IndexOutOfBounds {
                index,
                len: v.len(),
            });
        }
        v.insert(index, value);
        Ok(())
    }

    /// Removes and returns the element at `index`.
    pub fn remove(&mut self, index: usize) -> TensorResult<T> {
        let v = self.owned_mut("remove")?;
        if index >= v.len() {
            return Err(TensorError::IndexOutOfBounds {
                index,
                len: v.len(),
            });
        }
        Ok(v.remove(index))
    }

    /// Reserves room for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) -> TensorResult<()> {
        self.owned_mut("reserve")?.reserve(additional);
        Ok(())
    }

    /// Shrinks the owned capacity to the length.
    pub fn shrink_to_fit(&mut self) -> TensorResult<()> {
        self.owned_mut("shrink_to_fit")?.shrink_to_fit();
        Ok(())
    }

    /// Takes the contents, leaving an empty owning buffer behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    fn owned_mut(&mut self, op: &'static str) -> TensorResult<&mut Vec<T>> {
        match &mut self.storage {
            Storage::Owned(v) => Ok(v),
            Storage::View(_) => Err(TensorError::ViewMutation { op }),
        }
    }
}

impl<'a, T: Clone> OwningOrViewBuffer<'a, T> {
    /// Replaces the contents with a copy of `data`, becoming an owning buffer.
    ///
    /// An owning buffer reuses its allocation.
    pub fn assign(&mut self, data: &[T]) {
        match &mut self.storage {
            Storage::Owned(v) => {
                v.clear();
                v.extend_from_slice(data);
            }
            Storage::View(_) => self.storage = Storage::Owned(data.to_vec()),
        }
    }

    /// Resizes to `len` elements, filling new slots with `value`.
    pub fn resize(&mut self, len: usize, value: T) -> TensorResult<()> {
        self.owned_mut("resize")?.resize(len, value);
        Ok(())
    }

    /// Appends a copy of every element in `data`.
    pub fn extend_from_slice(&mut self, data: &[T]) -> TensorResult<()> {
        self.owned_mut("extend_from_slice")?.extend_from_slice(data);
        Ok(())
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: T) -> TensorResult<()> {
        self.as_mut_slice()?.fill(value);
        Ok(())
    }

    /// Copies the elements into a new `Vec`.
    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }

    /// Returns the elements mutably, copying a view into owned storage first.
    pub fn to_mut(&mut self) -> &mut [T] {
        if let Storage::View(s) = self.storage {
            self.storage = Storage::Owned(s.to_vec());
        }
        match &mut self.storage {
            Storage::Owned(v) => v.as_mut_slice(),
            Storage::View(_) => &mut [],
        }
    }

    /// Returns an owning buffer independent of any borrowed memory.
    ///
    /// A view is copied; an owning buffer is moved.
    pub fn into_owned(self) -> OwningOrViewBuffer<'static, T> {
        match self.storage {
            Storage::Owned(v) => OwningOrViewBuffer::from_vec(v),
            Storage::View(s) => OwningOrViewBuffer::from_vec(s.to_vec()),
        }
    }
}

impl<T> Default for OwningOrViewBuffer<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloning an owning buffer deep-copies it; cloning a view aliases the same
/// memory.
impl<T: Clone> Clone for OwningOrViewBuffer<'_, T> {
    fn clone(&self) -> Self {
        match &self.storage {
            Storage::Owned(v) => Self::from_vec(v.clone()),
            Storage::View(s) => Self::from_view(s),
        }
    }
}

impl<T> Deref for OwningOrViewBuffer<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T: PartialEq> PartialEq for OwningOrViewBuffer<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: fmt::Debug> fmt::Debug for OwningOrViewBuffer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_view() { "View" } else { "Owned" };
        f.debug_tuple(mode).field(&self.as_slice()).finish()
    }
}

impl<T> From<Vec<T>> for OwningOrViewBuffer<'_, T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<'a, T> From<&'a [T]> for OwningOrViewBuffer<'a, T> {
    fn from(data: &'a [T]) -> Self {
        Self::from_view(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_rejects_structural_mutation() {
        let backing = vec![1, 2, 3];
        let mut buf = OwningOrViewBuffer::from_view(&backing);

        assert_eq!(buf.push(4), Err(TensorError::ViewMutation { op: "push" }));
        assert_eq!(
            buf.resize(5, 0),
            Err(TensorError::ViewMutation { op: "resize" })
        );
        assert_eq!(
            buf.insert(0, 9),
            Err(TensorError::ViewMutation { op: "insert" })
        );
        assert_eq!(
            buf.reserve(16),
            Err(TensorError::ViewMutation { op: "reserve" })
        );
        assert!(buf.pop().is_err());
        assert!(buf.remove(0).is_err());
        assert!(buf.shrink_to_fit().is_err());
        assert!(buf.as_mut_slice().is_err());
        assert!(buf.fill(0).is_err());

        // Rejected calls leave the view untouched.
        assert!(buf.is_view());
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_owned_accepts_structural_mutation() {
        let mut buf = OwningOrViewBuffer::from_vec(vec![1, 2, 3]);
        buf.push(4).unwrap();
        buf.resize(6, 0).unwrap();
        buf.insert(0, 9).unwrap();
        buf.reserve(16).unwrap();
        assert_eq!(buf.as_slice(), &[9, 1, 2, 3, 4, 0, 0]);
        assert_eq!(buf.remove(0).unwrap(), 9);
        assert_eq!(buf.pop().unwrap(), Some(0));
        buf.as_mut_slice().unwrap()[0] = 7;
        assert_eq!(buf.as_slice(), &[7, 2, 3, 4, 0]);
    }

    #[test]
    fn test_get_view_aliases_without_copy() {
        let owned = OwningOrViewBuffer::from_vec(vec![1.0f32, 2.0]);
        let view = owned.get_view();
        assert!(view.is_view());
        assert_eq!(view.as_ptr(), owned.as_ptr());

        let view_of_view = view.get_view();
        assert_eq!(view_of_view.as_ptr(), owned.as_ptr());
    }

    #[test]
    fn test_clone_asymmetry() {
        let owned = OwningOrViewBuffer::from_vec(vec![1, 2, 3]);
        let deep = owned.clone();
        assert!(!deep.is_view());
        assert_ne!(deep.as_ptr(), owned.as_ptr());
        assert_eq!(deep, owned);

        let backing = vec![4, 5];
        let view = OwningOrViewBuffer::from_view(&backing);
        let alias = view.clone();
        assert!(alias.is_view());
        assert_eq!(alias.as_ptr(), backing.as_ptr());
    }

    #[test]
    fn test_take_leaves_empty_owner() {
        let mut buf = OwningOrViewBuffer::from_vec(vec![1, 2]);
        let moved = buf.take();
        assert_eq!(moved.as_slice(), &[1, 2]);
        assert!(buf.is_empty());
        assert!(!buf.is_view());
    }

    #[test]
    fn test_equality_ignores_mode() {
        let backing = vec![1, 2, 3];
        let view = OwningOrViewBuffer::from_view(&backing);
        let owned = OwningOrViewBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(view, owned);
        assert_ne!(owned, OwningOrViewBuffer::from_vec(vec![1, 2]));
    }

    #[test]
    fn test_assign_and_clear_leave_view_mode() {
        let backing = vec![1, 2, 3];
        let mut buf = OwningOrViewBuffer::from_view(&backing);
        buf.assign(&[8, 9]);
        assert!(!buf.is_view());
        assert_eq!(buf.as_slice(), &[8, 9]);

        buf.view(&backing);
        assert!(buf.is_view());
        buf.clear();
        assert!(!buf.is_view());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_at_bounds_checked() {
        let buf = OwningOrViewBuffer::from_vec(vec![10, 20]);
        assert_eq!(*buf.at(1).unwrap(), 20);
        assert_eq!(
            buf.at(2),
            Err(TensorError::IndexOutOfBounds { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_to_mut_detaches_view() {
        let backing = vec![1, 2, 3];
        let mut buf = OwningOrViewBuffer::from_view(&backing);
        buf.to_mut()[0] = 9;
        assert!(!buf.is_view());
        assert_eq!(buf.as_slice(), &[9, 2, 3]);
        assert_eq!(backing, vec![1, 2, 3]);

        let ptr = buf.as_ptr();
        buf.to_mut()[1] = 8;
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn test_into_owned_copies_view() {
        let backing = vec![3, 4];
        let view = OwningOrViewBuffer::from_view(&backing);
        let owned = view.into_owned();
        assert!(!owned.is_view());
        assert_ne!(owned.as_ptr(), backing.as_ptr());
        assert_eq!(owned.as_slice(), &[3, 4]);
    }
}
