//! Sparse row storage keyed by row id.
//!
//! A [`SparseRowStore`] holds rows of exactly `column_width` values, keyed by
//! [`RowId`]. Rows are created lazily by [`get_row`](SparseRowStore::get_row)
//! from the store's initializer, or copied in by the assignment and merge
//! operations. A row may also be a view over borrowed memory, which is how a
//! pulled store aliases the rows it was decoded from.
//!
//! # Example
//!
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use shardps_core::InitializerConfig;
//! use shardps_hash_table::SparseRowStore;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut store = SparseRowStore::new(4);
//! store.set_initializer(Some(InitializerConfig::ones())).unwrap();
//!
//! assert_eq!(store.get_row(&mut rng, 17), &[1.0; 4]);
//! assert_eq!(store.find_row(18), None);
//! assert_eq!(store.len(), 1);
//! ```

use std::borrow::Cow;

use rand::RngCore;
use shardps_core::codec::{Decode, DecodeView, Encode, Reader, Writer};
use shardps_core::{CoreError, InitializerConfig, RowId};
use shardps_tensor::OwningOrViewBuffer;

use crate::error::{HashTableError, Result};
use crate::initializer::{
    ConstantInitializer, Initializer, OnesInitializer, RandomNormalInitializer,
    RandomUniformInitializer, ZerosInitializer,
};
use crate::open_address::{MurmurMix, OpenAddressHashMap};

/// Leading version word of a serialized store and of its row map.
pub const SPARSE_ROW_MAGIC: i32 = 0x0a0c_72e7;

/// Widest row a store accepts. The width is serialized as an `i32`.
pub const MAX_COLUMN_WIDTH: usize = i32::MAX as usize;

/// Rows of a [`SparseRowStore`].
pub type RowMap<'a> = OpenAddressHashMap<RowId, OwningOrViewBuffer<'a, f32>, MurmurMix>;

/// A map from row id to a fixed-width row of `f32` values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseRowStore<'a> {
    col: usize,
    rows: RowMap<'a>,
    initializer: Option<InitializerConfig>,
}

fn check_width(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(HashTableError::InconsistentColumnWidth { expected, actual });
    }
    Ok(())
}

fn init_row(config: Option<&InitializerConfig>, rng: &mut dyn RngCore, col: usize) -> Vec<f32> {
    match config {
        None | Some(InitializerConfig::Zeros) => ZerosInitializer.initialize_row(rng, col),
        Some(InitializerConfig::Ones) => OnesInitializer.initialize_row(rng, col),
        Some(&InitializerConfig::Constant { value }) => {
            ConstantInitializer::new(value).initialize_row(rng, col)
        }
        Some(&InitializerConfig::RandomUniform { min, max }) => {
            RandomUniformInitializer::new(min, max).initialize_row(rng, col)
        }
        Some(&InitializerConfig::RandomNormal { mean, stddev }) => {
            RandomNormalInitializer::new(mean, stddev).initialize_row(rng, col)
        }
        // Rejected by set_initializer.
        Some(_) => vec![0.0; col],
    }
}

impl<'a> SparseRowStore<'a> {
    /// Creates an empty store with `col` values per row and no initializer.
    ///
    /// # Panics
    ///
    /// Panics if `col` exceeds [`MAX_COLUMN_WIDTH`]. Use
    /// [`try_new`](Self::try_new) for untrusted widths.
    pub fn new(col: usize) -> Self {
        match Self::try_new(col) {
            Ok(store) => store,
            Err(e) => panic!("{}", e),
        }
    }

    /// Creates an empty store, validating the width.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] if `col` exceeds
    /// [`MAX_COLUMN_WIDTH`].
    pub fn try_new(col: usize) -> Result<Self> {
        if col > MAX_COLUMN_WIDTH {
            return Err(HashTableError::InconsistentColumnWidth {
                expected: MAX_COLUMN_WIDTH,
                actual: col,
            });
        }
        Ok(Self {
            col,
            rows: RowMap::new(),
            initializer: None,
        })
    }

    /// Creates an empty store with an initializer.
    ///
    /// # Errors
    ///
    /// See [`try_new`](Self::try_new) and
    /// [`set_initializer`](Self::set_initializer).
    pub fn with_initializer(col: usize, config: InitializerConfig) -> Result<Self> {
        let mut store = Self::try_new(col)?;
        store.set_initializer(Some(config))?;
        Ok(store)
    }

    /// Returns the number of values per row.
    pub fn column_width(&self) -> usize {
        self.col
    }

    /// Returns the initializer used by [`get_row`](Self::get_row).
    pub fn initializer(&self) -> Option<&InitializerConfig> {
        self.initializer.as_ref()
    }

    /// Sets the initializer used by [`get_row`](Self::get_row).
    ///
    /// `None` means new rows are zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::Core`] if the configuration fails
    /// validation and [`HashTableError::UnsupportedInitializer`] for kinds
    /// that cannot produce a single row (variance scaling, `random_int`,
    /// `arange`). The store is unchanged on failure.
    pub fn set_initializer(&mut self, config: Option<InitializerConfig>) -> Result<()> {
        if let Some(config) = &config {
            config.validate()?;
            if !config.is_row_compatible() {
                return Err(HashTableError::UnsupportedInitializer {
                    initializer: "sparse_row",
                    message: format!("{:?} cannot initialize sparse rows", config),
                });
            }
        }
        self.initializer = config;
        Ok(())
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns `true` if row `id` is present.
    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Makes room for `rows` rows.
    pub fn reserve(&mut self, rows: usize) {
        self.rows.reserve(rows);
    }

    /// Removes every row. Width and initializer are kept.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Returns the underlying row map.
    pub fn rows(&self) -> &RowMap<'a> {
        &self.rows
    }

    /// Iterates over `(id, row)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &[f32])> {
        self.rows.iter().map(|(&id, row)| (id, row.as_slice()))
    }

    /// Iterates over row ids in unspecified order.
    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.keys().copied()
    }

    /// Returns row `id`, creating it from the initializer if absent.
    ///
    /// # Arguments
    ///
    /// * `rng` - Engine for random initializers.
    /// * `id` - The row id.
    ///
    /// A view row is copied into owned storage before it is returned, so
    /// writes land in this store and never in the borrowed memory.
    pub fn get_row(&mut self, rng: &mut dyn RngCore, id: RowId) -> &mut [f32] {
        let col = self.col;
        let config = self.initializer;
        let (row, _) = self.rows.get_or_insert_with(id, || {
            OwningOrViewBuffer::from_vec(init_row(config.as_ref(), rng, col))
        });
        row.to_mut()
    }

    /// Returns row `id`, creating a zero row if absent.
    pub fn get_row_no_init(&mut self, id: RowId) -> &mut [f32] {
        let col = self.col;
        let (row, _) = self
            .rows
            .get_or_insert_with(id, || OwningOrViewBuffer::from_vec(vec![0.0; col]));
        row.to_mut()
    }

    /// Returns row `id` if present, never creating it.
    pub fn find_row(&self, id: RowId) -> Option<&[f32]> {
        self.rows.get(&id).map(|row| row.as_slice())
    }

    /// Like [`get_row`](Self::get_row) for a store of width 1.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] if the width is not 1.
    pub fn get_scalar(&mut self, rng: &mut dyn RngCore, id: RowId) -> Result<f32> {
        check_width(1, self.col)?;
        Ok(self.get_row(rng, id)[0])
    }

    /// Like [`get_row_no_init`](Self::get_row_no_init) for a store of width 1.
    pub fn get_scalar_no_init(&mut self, id: RowId) -> Result<f32> {
        check_width(1, self.col)?;
        Ok(self.get_row_no_init(id)[0])
    }

    /// Like [`find_row`](Self::find_row) for a store of width 1.
    pub fn find_scalar(&self, id: RowId) -> Result<Option<f32>> {
        check_width(1, self.col)?;
        Ok(self.find_row(id).map(|row| row[0]))
    }

    /// Copies `values` into row `id`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] if `values` is not
    /// `column_width` long.
    pub fn assign(&mut self, id: RowId, values: &[f32]) -> Result<()> {
        check_width(self.col, values.len())?;
        let (row, inserted) = self
            .rows
            .get_or_insert_with(id, || OwningOrViewBuffer::from_vec(values.to_vec()));
        if !inserted {
            row.assign(values);
        }
        Ok(())
    }

    /// Stores row `id` as a view over `values`. No copy is made.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] if `values` is not
    /// `column_width` long.
    pub fn assign_view(&mut self, id: RowId, values: &'a [f32]) -> Result<()> {
        check_width(self.col, values.len())?;
        self.rows.insert(id, OwningOrViewBuffer::from_view(values));
        Ok(())
    }

    /// Overwrites this store's rows with every row of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] before changing
    /// anything if the widths differ.
    pub fn upsert(&mut self, other: &SparseRowStore<'_>) -> Result<()> {
        self.upsert_if(other, |_| true)
    }

    /// Like [`upsert`](Self::upsert), for the rows whose id satisfies `pred`.
    pub fn upsert_if<F>(&mut self, other: &SparseRowStore<'_>, mut pred: F) -> Result<()>
    where
        F: FnMut(RowId) -> bool,
    {
        check_width(self.col, other.col)?;
        for (id, values) in other.iter() {
            if pred(id) {
                self.assign(id, values)?;
            }
        }
        Ok(())
    }

    /// Copies in every row of `other` that this store does not have yet.
    ///
    /// Existing rows are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::InconsistentColumnWidth`] before changing
    /// anything if the widths differ.
    pub fn merge(&mut self, other: &SparseRowStore<'_>) -> Result<()> {
        self.merge_if(other, |_| true)
    }

    /// Like [`merge`](Self::merge), for the rows whose id satisfies `pred`.
    pub fn merge_if<F>(&mut self, other: &SparseRowStore<'_>, mut pred: F) -> Result<()>
    where
        F: FnMut(RowId) -> bool,
    {
        check_width(self.col, other.col)?;
        for (id, values) in other.iter() {
            if pred(id) {
                self.rows
                    .get_or_insert_with(id, || OwningOrViewBuffer::from_vec(values.to_vec()));
            }
        }
        Ok(())
    }

    /// Moves in every row of `other` that this store does not have yet.
    ///
    /// `other` is left empty; rows that were not moved are dropped.
    pub fn merge_from(&mut self, other: &mut SparseRowStore<'a>) -> Result<()> {
        self.merge_from_if(other, |_| true)
    }

    /// Like [`merge_from`](Self::merge_from), moving only the rows whose id
    /// satisfies `pred`.
    pub fn merge_from_if<F>(&mut self, other: &mut SparseRowStore<'a>, mut pred: F) -> Result<()>
    where
        F: FnMut(RowId) -> bool,
    {
        check_width(self.col, other.col)?;
        self.rows.reserve(self.rows.len() + other.rows.len());
        for (id, row) in other.rows.drain() {
            if pred(id) {
                self.rows.emplace(id, row);
            }
        }
        Ok(())
    }

    /// Removes every row for which `pred` returns `true`.
    ///
    /// Returns the number of rows removed.
    pub fn remove_if<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(RowId, &[f32]) -> bool,
    {
        self.rows.retain(|&id, row| !pred(id, row.as_slice()))
    }

    /// Removes every row whose values are all zero.
    pub fn remove_zeros(&mut self) -> usize {
        self.remove_if(|_, row| row.iter().all(|&v| v == 0.0))
    }

    /// Sets every value of every row to zero.
    ///
    /// View rows are replaced by owned zero rows.
    pub fn fill_zero(&mut self) {
        let col = self.col;
        for (_, row) in self.rows.iter_mut() {
            match row.as_mut_slice() {
                Ok(values) => values.fill(0.0),
                Err(_) => row.assign_vec(vec![0.0; col]),
            }
        }
    }

    /// Returns a store that owns all of its rows.
    ///
    /// View rows are copied; owned rows are moved.
    pub fn into_owned(self) -> SparseRowStore<'static> {
        let mut rows = OpenAddressHashMap::with_capacity(self.rows.len());
        for (id, row) in self.rows {
            rows.insert(id, row.into_owned());
        }
        SparseRowStore {
            col: self.col,
            rows,
            initializer: self.initializer,
        }
    }

    fn decode_header(r: &mut Reader<'_>) -> shardps_core::Result<(usize, usize)> {
        let magic = r.read_i32()?;
        if magic != SPARSE_ROW_MAGIC {
            return Err(CoreError::invalid(format!(
                "sparse store version {:#x}",
                magic
            )));
        }
        let col = r.read_i32()?;
        let col = usize::try_from(col)
            .map_err(|_| CoreError::invalid(format!("sparse store column width {}", col)))?;
        let map_magic = r.read_i32()?;
        if map_magic != SPARSE_ROW_MAGIC {
            return Err(CoreError::invalid(format!(
                "sparse row map version {:#x}",
                map_magic
            )));
        }
        let n = r.read_len()?;
        Ok((col, n))
    }

    fn decode_trailer(&mut self, r: &mut Reader<'_>) -> shardps_core::Result<()> {
        let kind = r.read_i32()?;
        let p1 = r.read_f32()?;
        let p2 = r.read_f32()?;
        self.initializer = InitializerConfig::from_code(kind, p1, p2)?;
        Ok(())
    }
}

fn decode_row_header(r: &mut Reader<'_>, col: usize) -> shardps_core::Result<RowId> {
    let id = r.read_u64()?;
    let len = r.read_len()?;
    if len != col {
        return Err(CoreError::invalid(format!(
            "row {} has {} values, store width is {}",
            id, len, col
        )));
    }
    Ok(id)
}

// Layout: i32 magic, i32 col, [i32 magic, u64 n, n x (u64 id, u64 len,
// f32 values)], i32 init kind, f32 param1, f32 param2.
impl Encode for SparseRowStore<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put_i32(SPARSE_ROW_MAGIC);
        // Bounded by MAX_COLUMN_WIDTH at construction.
        w.put_i32(i32::try_from(self.col).unwrap_or(i32::MAX));
        w.put_i32(SPARSE_ROW_MAGIC);
        w.put_len(self.rows.len());
        for (&id, row) in self.rows.iter() {
            w.put_u64(id);
            w.put_len(row.len());
            w.put_f32_raw(row.as_slice());
        }
        let (kind, p1, p2) = self.initializer.map_or((0, 0.0, 0.0), |c| c.to_code());
        w.put_i32(kind).put_f32(p1).put_f32(p2);
    }
}

impl Decode for SparseRowStore<'static> {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        let (col, n) = Self::decode_header(r)?;
        let mut store = SparseRowStore::new(col);
        store.rows.reserve(n.min(r.remaining()));
        for _ in 0..n {
            let id = decode_row_header(r, col)?;
            let values = r.read_f32_view(col)?.into_owned();
            store.rows.insert(id, OwningOrViewBuffer::from_vec(values));
        }
        store.decode_trailer(r)?;
        Ok(store)
    }
}

impl<'a> DecodeView<'a> for SparseRowStore<'a> {
    fn decode_view(r: &mut Reader<'a>) -> shardps_core::Result<Self> {
        let (col, n) = Self::decode_header(r)?;
        let mut store = SparseRowStore::new(col);
        store.rows.reserve(n.min(r.remaining()));
        for _ in 0..n {
            let id = decode_row_header(r, col)?;
            let row = match r.read_f32_view(col)? {
                Cow::Borrowed(values) => OwningOrViewBuffer::from_view(values),
                Cow::Owned(values) => OwningOrViewBuffer::from_vec(values),
            };
            store.rows.insert(id, row);
        }
        store.decode_trailer(r)?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shardps_core::codec::{decode_exact, encode_to_vec};

    fn store_with(col: usize, rows: &[(RowId, Vec<f32>)]) -> SparseRowStore<'static> {
        let mut store = SparseRowStore::new(col);
        for (id, values) in rows {
            store.assign(*id, values).unwrap();
        }
        store
    }

    #[test]
    fn test_get_row_materializes_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = SparseRowStore::new(8);
        store
            .set_initializer(Some(InitializerConfig::uniform(-1.0, 1.0)))
            .unwrap();

        let first = store.get_row(&mut rng, 5).to_vec();
        assert_eq!(first.len(), 8);
        assert!(first.iter().all(|&v| (-1.0..1.0).contains(&v)));
        assert_eq!(store.get_row(&mut rng, 5), first.as_slice());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_row_no_init_is_zero() {
        let mut store = SparseRowStore::with_initializer(3, InitializerConfig::ones()).unwrap();
        assert_eq!(store.get_row_no_init(1), &[0.0; 3]);
        assert_eq!(store.find_row(1), Some(&[0.0; 3][..]));
        assert_eq!(store.find_row(2), None);
    }

    #[test]
    fn test_set_initializer_validates() {
        let mut store = SparseRowStore::new(2);
        let err = store
            .set_initializer(Some(InitializerConfig::uniform(1.0, -1.0)))
            .unwrap_err();
        assert!(matches!(err, HashTableError::Core(CoreError::ConfigValidation { .. })));
        assert!(store
            .set_initializer(Some(InitializerConfig::XavierUniform))
            .is_err());
        assert_eq!(store.initializer(), None);
    }

    #[test]
    fn test_scalar_accessors() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut store = SparseRowStore::with_initializer(1, InitializerConfig::constant(2.5)).unwrap();
        assert_eq!(store.get_scalar(&mut rng, 9).unwrap(), 2.5);
        assert_eq!(store.get_scalar_no_init(10).unwrap(), 0.0);
        assert_eq!(store.find_scalar(11).unwrap(), None);

        let mut wide = SparseRowStore::new(2);
        assert!(matches!(
            wide.get_scalar_no_init(1),
            Err(HashTableError::InconsistentColumnWidth {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_assign_checks_width() {
        let mut store = SparseRowStore::new(2);
        store.assign(1, &[1.0, 2.0]).unwrap();
        // Idempotent.
        store.assign(1, &[1.0, 2.0]).unwrap();
        assert_eq!(store.find_row(1), Some(&[1.0, 2.0][..]));

        let err = store.assign(2, &[1.0]).unwrap_err();
        assert_eq!(
            err,
            HashTableError::InconsistentColumnWidth {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_assign_view_aliases() {
        let backing = vec![4.0f32, 5.0];
        let mut store = SparseRowStore::new(2);
        store.assign_view(3, &backing).unwrap();
        assert_eq!(store.find_row(3).unwrap().as_ptr(), backing.as_ptr());

        // Overwriting a view row copies instead of writing through.
        store.assign(3, &[0.0, 0.0]).unwrap();
        assert_eq!(backing, vec![4.0, 5.0]);
        assert_eq!(store.find_row(3), Some(&[0.0, 0.0][..]));
    }

    #[test]
    fn test_try_new_bounds_width() {
        assert_eq!(SparseRowStore::try_new(MAX_COLUMN_WIDTH).unwrap().column_width(), MAX_COLUMN_WIDTH);
        assert!(matches!(
            SparseRowStore::try_new(MAX_COLUMN_WIDTH + 1),
            Err(HashTableError::InconsistentColumnWidth { .. })
        ));
        assert!(SparseRowStore::with_initializer(MAX_COLUMN_WIDTH + 1, InitializerConfig::ones()).is_err());
    }

    #[test]
    #[should_panic(expected = "inconsistent column width")]
    fn test_new_panics_on_oversized_width() {
        SparseRowStore::new(MAX_COLUMN_WIDTH + 1);
    }

    #[test]
    fn test_get_row_writes_in_place() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut store = SparseRowStore::with_initializer(3, InitializerConfig::ones()).unwrap();
        store.get_row(&mut rng, 4)[1] = 7.0;
        assert_eq!(store.find_row(4), Some(&[1.0, 7.0, 1.0][..]));

        store.get_row_no_init(5).copy_from_slice(&[2.0, 3.0, 4.0]);
        assert_eq!(store.find_row(5), Some(&[2.0, 3.0, 4.0][..]));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_row_detaches_view_rows() {
        let mut rng = StdRng::seed_from_u64(1);
        let backing = vec![4.0f32, 5.0];
        let mut store = SparseRowStore::new(2);
        store.assign_view(3, &backing).unwrap();

        store.get_row(&mut rng, 3)[0] = -1.0;
        assert_eq!(store.find_row(3), Some(&[-1.0, 5.0][..]));
        assert_ne!(store.find_row(3).unwrap().as_ptr(), backing.as_ptr());
        assert_eq!(backing, vec![4.0, 5.0]);
    }

    #[test]
    fn test_merge_keeps_upsert_overwrites() {
        let other = store_with(2, &[(1, vec![9.0, 9.0]), (2, vec![8.0, 8.0])]);

        let mut merged = store_with(2, &[(1, vec![1.0, 1.0])]);
        merged.merge(&other).unwrap();
        assert_eq!(merged.find_row(1), Some(&[1.0, 1.0][..]));
        assert_eq!(merged.find_row(2), Some(&[8.0, 8.0][..]));

        let mut upserted = store_with(2, &[(1, vec![1.0, 1.0])]);
        upserted.upsert(&other).unwrap();
        assert_eq!(upserted.find_row(1), Some(&[9.0, 9.0][..]));
        assert_eq!(upserted.find_row(2), Some(&[8.0, 8.0][..]));
    }

    #[test]
    fn test_width_mismatch_leaves_store_unchanged() {
        let other = store_with(3, &[(1, vec![1.0, 2.0, 3.0])]);
        let mut store = store_with(2, &[(5, vec![0.5, 0.5])]);
        let before = store.clone();
        assert!(store.merge(&other).is_err());
        assert!(store.upsert(&other).is_err());
        assert_eq!(store, before);
    }

    #[test]
    fn test_merge_from_moves_rows() {
        let mut other = store_with(2, &[(1, vec![9.0, 9.0]), (2, vec![8.0, 8.0]), (3, vec![7.0, 7.0])]);
        let row2_ptr = other.find_row(2).unwrap().as_ptr();
        let mut store = store_with(2, &[(1, vec![1.0, 1.0])]);

        store.merge_from_if(&mut other, |id| id != 3).unwrap();
        assert!(other.is_empty());
        assert_eq!(store.len(), 2);
        assert_eq!(store.find_row(1), Some(&[1.0, 1.0][..]));
        // Moved, not copied.
        assert_eq!(store.find_row(2).unwrap().as_ptr(), row2_ptr);
        assert!(!store.contains(3));
    }

    #[test]
    fn test_remove_zeros() {
        let mut store = store_with(
            2,
            &[(1, vec![0.0, 0.0]), (2, vec![0.0, 1.0]), (3, vec![0.0, 0.0])],
        );
        assert_eq!(store.remove_zeros(), 2);
        assert_eq!(store.ids().collect::<Vec<_>>(), vec![2]);

        store.fill_zero();
        assert_eq!(store.find_row(2), Some(&[0.0, 0.0][..]));
    }

    #[test]
    fn test_equality_is_order_independent() {
        let a = store_with(1, &[(1, vec![1.0]), (2, vec![2.0])]);
        let b = store_with(1, &[(2, vec![2.0]), (1, vec![1.0])]);
        assert_eq!(a, b);

        let mut c = b.clone();
        c.set_initializer(Some(InitializerConfig::ones())).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_wire_round_trip() {
        let mut store = store_with(2, &[(7, vec![1.0, 2.0]), (u64::MAX, vec![3.0, 4.0])]);
        store
            .set_initializer(Some(InitializerConfig::normal(0.0, 0.01)))
            .unwrap();
        let bytes = encode_to_vec(&store);
        assert_eq!(&bytes[0..4], &SPARSE_ROW_MAGIC.to_ne_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_ne_bytes());

        let back: SparseRowStore<'static> = decode_exact(&bytes).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_decode_rejects_bad_rows() {
        let mut w = Writer::new();
        w.put_i32(SPARSE_ROW_MAGIC).put_i32(2).put_i32(SPARSE_ROW_MAGIC).put_u64(1);
        w.put_u64(1).put_u64(3).put_f32_raw(&[1.0, 2.0, 3.0]);
        w.put_i32(0).put_f32(0.0).put_f32(0.0);
        assert!(decode_exact::<SparseRowStore<'static>>(w.as_slice()).is_err());

        let mut w = Writer::new();
        w.put_i32(0x1234).put_i32(2);
        assert!(decode_exact::<SparseRowStore<'static>>(w.as_slice()).is_err());
    }
}
