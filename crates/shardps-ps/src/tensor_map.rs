//! Named collections of dense and sparse tensors.
//!
//! A [`TensorMap`] is what travels between workers and servers: a pull
//! response, a pushed delta, a split of a full parameter set. Each entry is a
//! [`TensorEntry`], either a [`DenseTensor`] or a [`SparseRowStore`], and may
//! own its values or view memory owned elsewhere.
//!
//! # Example
//!
//! ```
//! use shardps_core::codec::{decode_view_exact, encode_to_vec};
//! use shardps_ps::{TensorEntry, TensorMap};
//! use shardps_tensor::{DenseTensor, Shape};
//!
//! let mut map = TensorMap::new();
//! map.insert("bias", TensorEntry::Dense(DenseTensor::from_vec(Shape::vector(2), vec![0.5, 1.5]).unwrap()));
//!
//! let bytes = encode_to_vec(&map);
//! let back: TensorMap<'_> = decode_view_exact(&bytes).unwrap();
//! assert_eq!(back.dense("bias").unwrap().as_slice(), &[0.5, 1.5]);
//! ```

use hashbrown::HashMap;
use shardps_core::codec::{Decode, DecodeView, Encode, Reader, Writer};
use shardps_core::CoreError;
use shardps_hash_table::SparseRowStore;
use shardps_tensor::DenseTensor;

use crate::error::{PsError, Result};

/// Wire tags for the tensor kinds a [`TensorMap`] entry can carry.
///
/// Only [`TensorType::Tsr`] and [`TensorType::Srm`] are produced or accepted.
/// The remaining tags belong to kinds this crate does not store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TensorType {
    /// No value.
    None = 0,
    /// Dense tensor.
    Tsr = 1,
    /// Sparse row store.
    Srm = 2,
    /// Compressed sparse rows.
    Csr = 3,
    /// Dense integer tensor.
    Tsri = 4,
    /// Dense string tensor.
    Tsrs = 5,
    /// Legacy sparse row parameter.
    Srp = 10,
    /// Legacy sparse vector parameter.
    Svp = 11,
    /// Legacy sparse row gradient.
    Srg = 12,
    /// Legacy sparse vector gradient.
    Svg = 13,
}

impl TensorType {
    /// Maps a wire tag to its kind.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            0 => TensorType::None,
            1 => TensorType::Tsr,
            2 => TensorType::Srm,
            3 => TensorType::Csr,
            4 => TensorType::Tsri,
            5 => TensorType::Tsrs,
            10 => TensorType::Srp,
            11 => TensorType::Svp,
            12 => TensorType::Srg,
            13 => TensorType::Svg,
            _ => return None,
        })
    }

    /// Returns the short upper-case name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            TensorType::None => "NONE",
            TensorType::Tsr => "TSR",
            TensorType::Srm => "SRM",
            TensorType::Csr => "CSR",
            TensorType::Tsri => "TSRI",
            TensorType::Tsrs => "TSRS",
            TensorType::Srp => "SRP",
            TensorType::Svp => "SVP",
            TensorType::Srg => "SRG",
            TensorType::Svg => "SVG",
        }
    }
}

/// One named value of a [`TensorMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorEntry<'a> {
    /// A dense tensor.
    Dense(DenseTensor<'a>),
    /// A sparse row store.
    Sparse(SparseRowStore<'a>),
}

impl<'a> TensorEntry<'a> {
    /// Returns the wire tag of this entry.
    pub fn tensor_type(&self) -> TensorType {
        match self {
            TensorEntry::Dense(_) => TensorType::Tsr,
            TensorEntry::Sparse(_) => TensorType::Srm,
        }
    }

    /// Returns `true` if the entry holds no values.
    pub fn is_empty(&self) -> bool {
        match self {
            TensorEntry::Dense(tensor) => tensor.total_dim() == 0,
            TensorEntry::Sparse(store) => store.is_empty(),
        }
    }

    /// Returns the dense tensor, if this is one.
    pub fn as_dense(&self) -> Option<&DenseTensor<'a>> {
        match self {
            TensorEntry::Dense(tensor) => Some(tensor),
            TensorEntry::Sparse(_) => None,
        }
    }

    /// Returns the sparse store, if this is one.
    pub fn as_sparse(&self) -> Option<&SparseRowStore<'a>> {
        match self {
            TensorEntry::Dense(_) => None,
            TensorEntry::Sparse(store) => Some(store),
        }
    }

    /// Returns an entry that owns all of its values.
    pub fn into_owned(self) -> TensorEntry<'static> {
        match self {
            TensorEntry::Dense(tensor) => TensorEntry::Dense(tensor.into_owned()),
            TensorEntry::Sparse(store) => TensorEntry::Sparse(store.into_owned()),
        }
    }
}

impl<'a> From<DenseTensor<'a>> for TensorEntry<'a> {
    fn from(tensor: DenseTensor<'a>) -> Self {
        TensorEntry::Dense(tensor)
    }
}

impl<'a> From<SparseRowStore<'a>> for TensorEntry<'a> {
    fn from(store: SparseRowStore<'a>) -> Self {
        TensorEntry::Sparse(store)
    }
}

/// A map from tensor name to [`TensorEntry`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TensorMap<'a> {
    entries: HashMap<String, TensorEntry<'a>>,
}

impl<'a> TensorMap<'a> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the entry named `name`.
    pub fn get(&self, name: &str) -> Option<&TensorEntry<'a>> {
        self.entries.get(name)
    }

    /// Returns the entry named `name` mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut TensorEntry<'a>> {
        self.entries.get_mut(name)
    }

    /// Inserts an entry, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        entry: impl Into<TensorEntry<'a>>,
    ) -> Option<TensorEntry<'a>> {
        self.entries.insert(name.into(), entry.into())
    }

    /// Removes and returns the entry named `name`.
    pub fn remove(&mut self, name: &str) -> Option<TensorEntry<'a>> {
        self.entries.remove(name)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over `(name, entry)` pairs in unspecified order.
    pub fn iter(&self) -> hashbrown::hash_map::Iter<'_, String, TensorEntry<'a>> {
        self.entries.iter()
    }

    /// Iterates mutably over `(name, entry)` pairs in unspecified order.
    pub fn iter_mut(&mut self) -> hashbrown::hash_map::IterMut<'_, String, TensorEntry<'a>> {
        self.entries.iter_mut()
    }

    /// Returns the dense tensor named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::TensorNotFound`] or [`PsError::WrongTensorKind`].
    pub fn dense(&self, name: &str) -> Result<&DenseTensor<'a>> {
        match self.entries.get(name) {
            Some(TensorEntry::Dense(tensor)) => Ok(tensor),
            Some(TensorEntry::Sparse(_)) => Err(wrong_kind(name, "dense")),
            None => Err(not_found(name)),
        }
    }

    /// Returns the dense tensor named `name` mutably, see [`dense`](Self::dense).
    pub fn dense_mut(&mut self, name: &str) -> Result<&mut DenseTensor<'a>> {
        match self.entries.get_mut(name) {
            Some(TensorEntry::Dense(tensor)) => Ok(tensor),
            Some(TensorEntry::Sparse(_)) => Err(wrong_kind(name, "dense")),
            None => Err(not_found(name)),
        }
    }

    /// Returns the sparse store named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::TensorNotFound`] or [`PsError::WrongTensorKind`].
    pub fn sparse(&self, name: &str) -> Result<&SparseRowStore<'a>> {
        match self.entries.get(name) {
            Some(TensorEntry::Sparse(store)) => Ok(store),
            Some(TensorEntry::Dense(_)) => Err(wrong_kind(name, "sparse")),
            None => Err(not_found(name)),
        }
    }

    /// Returns the sparse store named `name` mutably, see [`sparse`](Self::sparse).
    pub fn sparse_mut(&mut self, name: &str) -> Result<&mut SparseRowStore<'a>> {
        match self.entries.get_mut(name) {
            Some(TensorEntry::Sparse(store)) => Ok(store),
            Some(TensorEntry::Dense(_)) => Err(wrong_kind(name, "sparse")),
            None => Err(not_found(name)),
        }
    }

    /// Returns the dense tensor named `name`, inserting an empty one if it is
    /// missing or has the other kind.
    pub fn get_or_insert_dense(&mut self, name: &str) -> &mut DenseTensor<'a> {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| TensorEntry::Dense(DenseTensor::new()));
        if !matches!(entry, TensorEntry::Dense(_)) {
            *entry = TensorEntry::Dense(DenseTensor::new());
        }
        match entry {
            TensorEntry::Dense(tensor) => tensor,
            TensorEntry::Sparse(_) => unreachable!("entry was just made dense"),
        }
    }

    /// Returns the sparse store named `name`, inserting an empty one of width
    /// `col` if it is missing, has the other kind, or has another width.
    pub fn get_or_insert_sparse(&mut self, name: &str, col: usize) -> &mut SparseRowStore<'a> {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| TensorEntry::Sparse(SparseRowStore::new(col)));
        let reusable = matches!(entry, TensorEntry::Sparse(store) if store.column_width() == col);
        if !reusable {
            *entry = TensorEntry::Sparse(SparseRowStore::new(col));
        }
        match entry {
            TensorEntry::Sparse(store) => store,
            TensorEntry::Dense(_) => unreachable!("entry was just made sparse"),
        }
    }

    /// Removes every row of every sparse entry. Dense entries are untouched.
    pub fn clear_sparse_values(&mut self) {
        for entry in self.entries.values_mut() {
            if let TensorEntry::Sparse(store) = entry {
                store.clear();
            }
        }
    }

    /// Empties every entry: dense tensors become shape `(0)` and sparse
    /// stores lose their rows. Names are kept.
    pub fn clear_values(&mut self) {
        for entry in self.entries.values_mut() {
            match entry {
                TensorEntry::Dense(tensor) => tensor.clear(),
                TensorEntry::Sparse(store) => store.clear(),
            }
        }
    }

    /// Zeroes every dense tensor in place and removes every sparse row.
    ///
    /// A dense view is replaced by an owning zero tensor of the same shape.
    pub fn zeros_values(&mut self) {
        for entry in self.entries.values_mut() {
            match entry {
                TensorEntry::Dense(tensor) => {
                    if tensor.fill_zero().is_err() {
                        let shape = tensor.shape().clone();
                        let len = tensor.total_dim();
                        // A view's shape is always concrete and sized.
                        *tensor = DenseTensor::from_vec(shape, vec![0.0; len])
                            .unwrap_or_default();
                    }
                }
                TensorEntry::Sparse(store) => store.clear(),
            }
        }
    }

    /// Drops every entry that holds no values.
    pub fn remove_empty_values(&mut self) {
        self.entries.retain(|_, entry| !entry.is_empty());
    }

    /// Returns a map that owns all of its values.
    pub fn into_owned(self) -> TensorMap<'static> {
        TensorMap {
            entries: self
                .entries
                .into_iter()
                .map(|(name, entry)| (name, entry.into_owned()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for TensorMap<'a> {
    type Item = (String, TensorEntry<'a>);
    type IntoIter = hashbrown::hash_map::IntoIter<String, TensorEntry<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'m, 'a> IntoIterator for &'m TensorMap<'a> {
    type Item = (&'m String, &'m TensorEntry<'a>);
    type IntoIter = hashbrown::hash_map::Iter<'m, String, TensorEntry<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<'a> FromIterator<(String, TensorEntry<'a>)> for TensorMap<'a> {
    fn from_iter<I: IntoIterator<Item = (String, TensorEntry<'a>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn not_found(name: &str) -> PsError {
    PsError::TensorNotFound {
        name: name.to_string(),
    }
}

fn wrong_kind(name: &str, expected: &'static str) -> PsError {
    PsError::WrongTensorKind {
        name: name.to_string(),
        expected,
    }
}

/// Writes one `name, i32 tag, payload` record.
pub(crate) fn encode_named_entry(w: &mut Writer, name: &str, entry: &TensorEntry<'_>) {
    w.put(name);
    entry.encode(w);
}

fn decode_tag(r: &mut Reader<'_>, name: &str) -> shardps_core::Result<TensorType> {
    let tag = r.read_i32()?;
    match TensorType::from_tag(tag) {
        Some(kind @ (TensorType::Tsr | TensorType::Srm)) => Ok(kind),
        Some(kind) => Err(CoreError::invalid(format!(
            "tensor {} has unsupported type {} ({})",
            name,
            kind.name(),
            tag
        ))),
        None => Err(CoreError::UnknownTag {
            kind: "tensor type",
            tag: i64::from(tag),
        }),
    }
}

// Layout: i32 tag, then the dense or sparse payload.
impl Encode for TensorEntry<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put_i32(self.tensor_type() as i32);
        match self {
            TensorEntry::Dense(tensor) => tensor.encode(w),
            TensorEntry::Sparse(store) => store.encode(w),
        }
    }
}

// Layout: u64 count, then count x (name, i32 tag, payload).
impl Encode for TensorMap<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.entries.len());
        for (name, entry) in &self.entries {
            encode_named_entry(w, name, entry);
        }
    }
}

impl Decode for TensorMap<'static> {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        let n = r.read_len()?;
        let mut entries = HashMap::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            let name = String::decode(r)?;
            let entry = match decode_tag(r, &name)? {
                TensorType::Tsr => TensorEntry::Dense(DenseTensor::decode(r)?),
                _ => TensorEntry::Sparse(SparseRowStore::decode(r)?),
            };
            entries.insert(name, entry);
        }
        Ok(TensorMap { entries })
    }
}

impl<'a> DecodeView<'a> for TensorMap<'a> {
    fn decode_view(r: &mut Reader<'a>) -> shardps_core::Result<Self> {
        let n = r.read_len()?;
        let mut entries = HashMap::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            let name = String::decode(r)?;
            let entry = match decode_tag(r, &name)? {
                TensorType::Tsr => TensorEntry::Dense(DenseTensor::decode_view(r)?),
                _ => TensorEntry::Sparse(SparseRowStore::decode_view(r)?),
            };
            entries.insert(name, entry);
        }
        Ok(TensorMap { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardps_core::codec::{decode_exact, decode_view_exact, encode_to_vec};
    use shardps_core::InitializerConfig;
    use shardps_tensor::Shape;

    fn sample() -> TensorMap<'static> {
        let mut map = TensorMap::new();
        map.insert(
            "w",
            DenseTensor::from_vec(Shape::matrix(2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        let mut emb = SparseRowStore::with_initializer(2, InitializerConfig::zeros()).unwrap();
        emb.assign(7, &[0.5, -0.5]).unwrap();
        emb.assign(9, &[1.5, 2.5]).unwrap();
        map.insert("emb", emb);
        map
    }

    #[test]
    fn test_typed_accessors() {
        let mut map = sample();
        assert_eq!(map.len(), 2);
        assert_eq!(map.dense("w").unwrap().total_dim(), 4);
        assert_eq!(map.sparse("emb").unwrap().len(), 2);
        assert!(matches!(
            map.dense("emb"),
            Err(PsError::WrongTensorKind { expected: "dense", .. })
        ));
        assert!(matches!(
            map.sparse_mut("missing"),
            Err(PsError::TensorNotFound { .. })
        ));
        assert_eq!(map.get("w").unwrap().tensor_type(), TensorType::Tsr);
    }

    #[test]
    fn test_get_or_insert_replaces_other_kind() {
        let mut map = sample();
        map.get_or_insert_sparse("w", 3).assign(1, &[1.0; 3]).unwrap();
        assert_eq!(map.sparse("w").unwrap().column_width(), 3);

        // Same width keeps existing rows.
        assert_eq!(map.get_or_insert_sparse("emb", 2).len(), 2);
        // Another width starts over.
        assert!(map.get_or_insert_sparse("emb", 4).is_empty());

        let dense = map.get_or_insert_dense("fresh");
        assert_eq!(dense.total_dim(), 0);
    }

    #[test]
    fn test_value_helpers() {
        let mut map = sample();
        map.clear_sparse_values();
        assert!(map.sparse("emb").unwrap().is_empty());
        assert_eq!(map.dense("w").unwrap().as_slice(), &[1.0, 2.0, 3.0, 4.0]);

        let mut map = sample();
        map.zeros_values();
        assert!(map.dense("w").unwrap().is_all_zero());
        assert_eq!(map.dense("w").unwrap().total_dim(), 4);
        assert!(map.sparse("emb").unwrap().is_empty());

        map.remove_empty_values();
        assert_eq!(map.len(), 1);
        assert!(map.contains("w"));

        map.clear_values();
        map.remove_empty_values();
        assert!(map.is_empty());
    }

    #[test]
    fn test_zeros_values_on_view() {
        let storage = vec![3.0f32; 6];
        let mut map = TensorMap::new();
        map.insert(
            "v",
            DenseTensor::from_view(Shape::matrix(2, 3), &storage).unwrap(),
        );
        map.zeros_values();
        let tensor = map.dense("v").unwrap();
        assert!(!tensor.is_view());
        assert!(tensor.is_all_zero());
        assert_eq!(tensor.shape(), &Shape::matrix(2, 3));
        assert_eq!(storage, vec![3.0; 6]);
    }

    #[test]
    fn test_codec_preserves_entries() {
        let map = sample();
        let bytes = encode_to_vec(&map);

        let owned: TensorMap<'static> = decode_exact(&bytes).unwrap();
        assert_eq!(owned, map);

        let view: TensorMap<'_> = decode_view_exact(&bytes).unwrap();
        assert_eq!(view.sparse("emb").unwrap().find_row(9), Some(&[1.5, 2.5][..]));
        assert_eq!(
            view.sparse("emb").unwrap().initializer(),
            Some(&InitializerConfig::Zeros)
        );
    }

    fn single_entry_with_tag(tag: i32) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_len(1).put("x").put_i32(tag);
        w.as_slice().to_vec()
    }

    #[test]
    fn test_decode_rejects_unsupported_kinds() {
        let err = decode_exact::<TensorMap<'static>>(&single_entry_with_tag(3)).unwrap_err();
        match err {
            CoreError::InvalidValue { message } => assert!(message.contains("CSR (3)")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = decode_exact::<TensorMap<'static>>(&single_entry_with_tag(42)).unwrap_err();
        assert_eq!(
            err,
            CoreError::UnknownTag {
                kind: "tensor type",
                tag: 42
            }
        );
    }
}
