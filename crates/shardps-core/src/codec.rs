//! Sequential binary codec used on the wire and on disk.
//!
//! Every primitive is written at its native width in host byte order. Strings
//! are a `u64` byte length followed by the bytes, containers are a `u64`
//! element count followed by the elements. There is no varint or compression.
//!
//! # Overview
//!
//! - [`Writer`] - An append-only output buffer backed by [`bytes::BytesMut`]
//! - [`Reader`] - A cursor over a borrowed byte slice
//! - [`Encode`] / [`Decode`] - Owned values that can be packed and unpacked
//! - [`DecodeView`] - Values that may borrow from the input (zero-copy)
//!
//! # Example
//!
//! ```
//! use shardps_core::codec::{decode_exact, encode_to_vec};
//!
//! let value = (7u64, String::from("emb"));
//! let bytes = encode_to_vec(&value);
//! assert_eq!(bytes.len(), 8 + 8 + 3);
//!
//! let back: (u64, String) = decode_exact(&bytes).unwrap();
//! assert_eq!(back, value);
//! ```

use std::borrow::Cow;
use std::hash::{BuildHasher, Hash};

use bytes::{Buf, BufMut, BytesMut};
use hashbrown::{HashMap, HashSet};

use crate::error::{CoreError, Result};

/// An append-only binary output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Encodes `value` at the end of the buffer.
    pub fn put<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    /// Appends a `u8`.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Appends a native-endian `i32`.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_ne(value);
        self
    }

    /// Appends a native-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_ne(value);
        self
    }

    /// Appends a native-endian `i64`.
    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_ne(value);
        self
    }

    /// Appends a native-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_ne(value);
        self
    }

    /// Appends a native-endian `f32`.
    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32_ne(value);
        self
    }

    /// Appends a native-endian `f64`.
    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64_ne(value);
        self
    }

    /// Appends a `usize` as a `u64` length or count prefix.
    pub fn put_len(&mut self, len: usize) -> &mut Self {
        self.put_u64(len as u64)
    }

    /// Appends raw bytes with no prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Appends raw `f32` values with no prefix.
    pub fn put_f32_raw(&mut self, values: &[f32]) -> &mut Self {
        self.buf.put_slice(bytemuck::cast_slice(values));
        self
    }

    /// Overwrites eight bytes at `offset` with a native-endian `u64`.
    ///
    /// Used to back-fill a length prefix once the payload size is known.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnexpectedEof`] if `offset + 8` is past the end.
    pub fn patch_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        let end = offset.checked_add(8).unwrap_or(usize::MAX);
        if end > self.buf.len() {
            return Err(CoreError::UnexpectedEof {
                needed: 8,
                remaining: self.buf.len().saturating_sub(offset),
            });
        }
        self.buf[offset..end].copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discards the contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns the underlying buffer.
    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// A cursor over a borrowed byte slice.
///
/// Borrowed reads (`read_raw`, `read_f32_view`) return slices with the
/// lifetime of the input, so decoded values can alias the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Creates a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the unread bytes without consuming them.
    pub fn peek(&self) -> &'a [u8] {
        self.buf
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            return Err(CoreError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Decodes a value of type `T`.
    pub fn get<T: Decode>(&mut self) -> Result<T> {
        T::decode(self)
    }

    /// Reads a `u8`.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a native-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_ne())
    }

    /// Reads a native-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_ne())
    }

    /// Reads a native-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_ne())
    }

    /// Reads a native-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_ne())
    }

    /// Reads a native-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_ne())
    }

    /// Reads a native-endian `f64`.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_ne())
    }

    /// Reads a `u64` length or count prefix as a `usize`.
    pub fn read_len(&mut self) -> Result<usize> {
        let length = self.read_u64()?;
        usize::try_from(length).map_err(|_| CoreError::LengthOverflow { length })
    }

    /// Reads `n` raw bytes, borrowing them from the input.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads `n` raw `f32` values.
    ///
    /// Borrows from the input when the bytes happen to be aligned for `f32`
    /// and falls back to a copy otherwise.
    pub fn read_f32_view(&mut self, n: usize) -> Result<Cow<'a, [f32]>> {
        let bytes = n
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or(CoreError::LengthOverflow { length: n as u64 })?;
        let raw = self.read_raw(bytes)?;
        Ok(match bytemuck::try_cast_slice::<u8, f32>(raw) {
            Ok(values) => Cow::Borrowed(values),
            Err(_) => Cow::Owned(
                raw.chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
        })
    }

    /// Fails with [`CoreError::TrailingBytes`] if input remains.
    pub fn finish(self) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(CoreError::TrailingBytes {
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// A value that can be written with a [`Writer`].
pub trait Encode {
    /// Appends the encoding of `self` to `w`.
    fn encode(&self, w: &mut Writer);
}

/// An owned value that can be read from a [`Reader`].
pub trait Decode: Sized {
    /// Decodes one value from `r`.
    fn decode(r: &mut Reader<'_>) -> Result<Self>;
}

/// A value that may borrow from the bytes it is decoded from.
pub trait DecodeView<'a>: Sized {
    /// Decodes one value from `r`, aliasing `r`'s input where possible.
    fn decode_view(r: &mut Reader<'a>) -> Result<Self>;
}

/// Encodes `value` into a fresh byte vector.
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut w = Writer::new();
    value.encode(&mut w);
    w.as_slice().to_vec()
}

/// Decodes a `T` that must span all of `bytes`.
pub fn decode_exact<T: Decode>(bytes: &[u8]) -> Result<T> {
    let mut r = Reader::new(bytes);
    let value = T::decode(&mut r)?;
    r.finish()?;
    Ok(value)
}

/// Decodes a borrowing `T` that must span all of `bytes`.
pub fn decode_view_exact<'a, T: DecodeView<'a>>(bytes: &'a [u8]) -> Result<T> {
    let mut r = Reader::new(bytes);
    let value = T::decode_view(&mut r)?;
    r.finish()?;
    Ok(value)
}

macro_rules! impl_primitive {
    ($($ty:ty => $put:ident, $read:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, w: &mut Writer) {
                    w.$put(*self);
                }
            }

            impl Decode for $ty {
                fn decode(r: &mut Reader<'_>) -> Result<Self> {
                    r.$read()
                }
            }
        )*
    };
}

impl_primitive! {
    u8 => put_u8, read_u8;
    i32 => put_i32, read_i32;
    u32 => put_u32, read_u32;
    i64 => put_i64, read_i64;
    u64 => put_u64, read_u64;
    f32 => put_f32, read_f32;
    f64 => put_f64, read_f64;
}

impl Encode for str {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len()).put_raw(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, w: &mut Writer) {
        self.as_str().encode(w);
    }
}

impl Decode for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let len = r.read_len()?;
        let raw = r.read_raw(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CoreError::InvalidUtf8)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len());
        for item in self {
            item.encode(w);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut Writer) {
        self.as_slice().encode(w);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.read_len()?;
        // Cap the preallocation so a corrupt count cannot exhaust memory.
        let mut out = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode(&self, w: &mut Writer) {
        self.0.encode(w);
        self.1.encode(w);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let a = A::decode(r)?;
        let b = B::decode(r)?;
        Ok((a, b))
    }
}

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len());
        for (k, v) in self {
            k.encode(w);
            v.encode(w);
        }
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Eq + Hash,
    V: Decode,
    S: BuildHasher + Default,
{
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.read_len()?;
        let mut out = HashMap::with_capacity_and_hasher(n.min(r.remaining()), S::default());
        for _ in 0..n {
            let k = K::decode(r)?;
            let v = V::decode(r)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<T: Encode, S> Encode for HashSet<T, S> {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.len());
        for item in self {
            item.encode(w);
        }
    }
}

impl<T, S> Decode for HashSet<T, S>
where
    T: Decode + Eq + Hash,
    S: BuildHasher + Default,
{
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.read_len()?;
        let mut out = HashSet::with_capacity_and_hasher(n.min(r.remaining()), S::default());
        for _ in 0..n {
            out.insert(T::decode(r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let bytes = encode_to_vec("ab");
        let mut expected = 2u64.to_ne_bytes().to_vec();
        expected.extend_from_slice(b"ab");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_container_layout() {
        let bytes = encode_to_vec(&vec![1i32, 2, 3]);
        assert_eq!(bytes.len(), 8 + 3 * 4);
        assert_eq!(&bytes[..8], &3u64.to_ne_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_ne_bytes());
    }

    #[test]
    fn test_decode_short_input() {
        let err = decode_exact::<u64>(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            CoreError::UnexpectedEof {
                needed: 8,
                remaining: 3
            }
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = encode_to_vec(&5i32);
        bytes.push(0);
        let err = decode_exact::<i32>(&bytes).unwrap_err();
        assert_eq!(err, CoreError::TrailingBytes { remaining: 1 });
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut bytes = 2u64.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(
            decode_exact::<String>(&bytes).unwrap_err(),
            CoreError::InvalidUtf8
        );
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        // Count claims u64::MAX / 2 elements but no payload follows.
        let bytes = (u64::MAX / 2).to_ne_bytes();
        assert!(decode_exact::<Vec<u64>>(&bytes).is_err());
    }

    #[test]
    fn test_hash_collections() {
        let mut map: HashMap<u64, Vec<u64>> = HashMap::new();
        map.insert(1, vec![10, 11]);
        map.insert(2, vec![]);
        let back: HashMap<u64, Vec<u64>> = decode_exact(&encode_to_vec(&map)).unwrap();
        assert_eq!(back, map);

        let set: HashSet<String> = ["a", "bc"].iter().map(|s| s.to_string()).collect();
        let back: HashSet<String> = decode_exact(&encode_to_vec(&set)).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_f32_view_aligned_borrows() {
        let values = vec![1.0f32, 2.0, 3.0];
        let bytes: &[u8] = bytemuck::cast_slice(values.as_slice());
        let mut r = Reader::new(bytes);
        let view = r.read_f32_view(3).unwrap();
        assert!(matches!(view, Cow::Borrowed(_)));
        assert_eq!(view.as_ref().as_ptr(), values.as_ptr());
        r.finish().unwrap();
    }

    #[test]
    fn test_f32_view_misaligned_copies() {
        let values = [1.5f32, -2.5];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(bytemuck::cast_slice(&values[..]));
        let mut r = Reader::new(&bytes);
        r.read_u8().unwrap();
        let view = r.read_f32_view(2).unwrap();
        assert_eq!(view.as_ref(), &values);
    }

    #[test]
    fn test_patch_u64() {
        let mut w = Writer::new();
        w.put_u64(0).put_i32(9);
        w.patch_u64(0, 4).unwrap();
        assert_eq!(&w.as_slice()[..8], &4u64.to_ne_bytes());
        assert!(w.patch_u64(8, 1).is_err());
    }
}
