//! Open-addressing hash map with linear probing and tombstones.
//!
//! Buckets are a power-of-two array of slots, each `Empty`, `Used` or
//! `Deleted`. A key lives in the first slot reachable by stepping `+1` (with
//! wraparound) from `hash(key) & mask`. Removal leaves a `Deleted` tombstone
//! so probe chains that pass through the slot stay intact; the next insert
//! that probes past a tombstone reuses it.
//!
//! The bucket array is sized to `next_size(n) = max(128, next_pow2(2n))` and
//! rehashed once live entries plus tombstones reach two thirds of it.
//!
//! # Example
//!
//! ```
//! use shardps_hash_table::OpenAddressHashMap;
//!
//! let mut map: OpenAddressHashMap<u64, &str> = OpenAddressHashMap::new();
//! assert_eq!(map.emplace(7, "seven").1, true);
//! assert_eq!(map.emplace(7, "other").1, false);
//! assert_eq!(map.get(&7), Some(&"seven"));
//!
//! assert_eq!(map.remove(&7), Some("seven"));
//! assert!(map.is_empty());
//! ```

use std::fmt;

use shardps_core::hash::murmur3_mix;

use crate::error::{HashTableError, Result};

/// Minimum number of buckets once the table allocates.
pub const MIN_BUCKETS: usize = 128;

/// Maps a key to its home bucket before masking.
pub trait SlotHasher<K: ?Sized> {
    /// Hashes `key`.
    fn hash_slot(&self, key: &K) -> u64;
}

/// Uses an integer key as its own hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHash;

/// Applies the MurmurHash3 64-bit finalizer to integer keys.
///
/// Sparse row ids are frequently sequential or share low bits, so they are
/// mixed before masking.
#[derive(Debug, Clone, Copy, Default)]
pub struct MurmurMix;

macro_rules! impl_integer_hashers {
    ($($ty:ty),*) => {
        $(
            impl SlotHasher<$ty> for IdentityHash {
                fn hash_slot(&self, key: &$ty) -> u64 {
                    *key as u64
                }
            }

            impl SlotHasher<$ty> for MurmurMix {
                fn hash_slot(&self, key: &$ty) -> u64 {
                    murmur3_mix(*key as u64)
                }
            }
        )*
    };
}

impl_integer_hashers!(u32, u64, usize, i32, i64);

#[derive(Clone)]
enum Slot<K, V> {
    Empty,
    Used(K, V),
    Deleted,
}

/// Returns the bucket count used to hold `n` entries.
pub fn next_size(n: usize) -> usize {
    n.saturating_mul(2).next_power_of_two().max(MIN_BUCKETS)
}

fn rehash_threshold(buckets: usize) -> usize {
    buckets * 2 / 3
}

/// An open-addressing hash map.
///
/// See the [module documentation](self) for the probing scheme.
#[derive(Clone)]
pub struct OpenAddressHashMap<K, V, H = IdentityHash> {
    slots: Vec<Slot<K, V>>,
    len: usize,
    deleted: usize,
    hasher: H,
}

impl<K, V, H: Default> Default for OpenAddressHashMap<K, V, H> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            deleted: 0,
            hasher: H::default(),
        }
    }
}

impl<K, V, H: Default> OpenAddressHashMap<K, V, H> {
    /// Creates an empty map. No buckets are allocated until the first insert.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V, H> OpenAddressHashMap<K, V, H> {
    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of tombstones.
    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Returns the index of the first used slot at or after `from`.
    pub fn find_next_used_slot(&self, from: usize) -> Option<usize> {
        (from..self.slots.len()).find(|&i| matches!(self.slots[i], Slot::Used(..)))
    }

    /// Returns the entry stored in slot `index`, if that slot is in use.
    pub fn slot(&self, index: usize) -> Option<(&K, &V)> {
        match self.slots.get(index) {
            Some(Slot::Used(k, v)) => Some((k, v)),
            _ => None,
        }
    }

    /// Marks slot `index` deleted and returns its entry.
    ///
    /// Returns `None` and changes nothing if the slot is not in use.
    pub fn erase(&mut self, index: usize) -> Option<(K, V)> {
        if !matches!(self.slots.get(index), Some(Slot::Used(..))) {
            return None;
        }
        match std::mem::replace(&mut self.slots[index], Slot::Deleted) {
            Slot::Used(k, v) => {
                self.len -= 1;
                self.deleted += 1;
                Some((k, v))
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    /// Iterates over entries in bucket order.
    ///
    /// The order is neither insertion order nor stable across a rehash.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.slots.iter(),
        }
    }

    /// Iterates mutably over entries in bucket order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.slots.iter_mut(),
        }
    }

    /// Iterates over keys in bucket order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Removes every entry for which `keep` returns `false`.
    ///
    /// Removed slots become tombstones.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut removed = 0;
        for slot in &mut self.slots {
            let drop_it = match slot {
                Slot::Used(k, v) => !keep(k, v),
                _ => false,
            };
            if drop_it {
                *slot = Slot::Deleted;
                removed += 1;
            }
        }
        self.len -= removed;
        self.deleted += removed;
        removed
    }

    /// Removes every entry and releases the buckets.
    pub fn clear(&mut self) {
        self.slots = Vec::new();
        self.len = 0;
        self.deleted = 0;
    }

    /// Removes and yields every entry, leaving the map empty.
    pub fn drain(&mut self) -> IntoIter<K, V> {
        let slots = std::mem::take(&mut self.slots);
        self.len = 0;
        self.deleted = 0;
        IntoIter {
            inner: slots.into_iter(),
        }
    }

    fn used_value_mut(&mut self, index: usize) -> &mut V {
        match &mut self.slots[index] {
            Slot::Used(_, v) => v,
            _ => unreachable!("slot {} is not in use", index),
        }
    }
}

impl<K: Eq, V, H: SlotHasher<K>> OpenAddressHashMap<K, V, H> {
    /// Creates an empty map with buckets for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self
    where
        H: Default,
    {
        let mut map = Self::new();
        map.rehash(capacity);
        map
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn home(&self, key: &K) -> usize {
        (self.hasher.hash_slot(key) as usize) & self.mask()
    }

    /// Returns the slot where `key` lives or would be inserted.
    ///
    /// Probing stops at the first matching used slot, or at the first empty
    /// slot in which case the first tombstone seen along the way is
    /// preferred. The buckets must be allocated.
    fn find_slot(&self, key: &K) -> usize {
        let mask = self.mask();
        let mut index = self.home(key);
        let mut first_deleted = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return first_deleted.unwrap_or(index),
                Slot::Deleted => {
                    first_deleted.get_or_insert(index);
                }
                Slot::Used(k, _) if k == key => return index,
                Slot::Used(..) => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Returns the slot holding `key`, never inserting.
    ///
    /// Tombstones are skipped; an empty slot ends the probe.
    pub fn find_used_slot(&self, key: &K) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut index = self.home(key);
        for _ in 0..self.slots.len() {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Used(k, _) if k == key => return Some(index),
                _ => {}
            }
            index = (index + 1) & mask;
        }
        None
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_used_slot(key).is_some()
    }

    fn rehash_for_emplace(&mut self) {
        if self.len + self.deleted + 1 > rehash_threshold(self.slots.len()) {
            self.rehash(self.len + 1);
        }
    }

    /// Inserts `key` with `value` unless `key` is already present.
    ///
    /// Returns the slot index and whether an insert happened. An existing
    /// entry is left untouched and `value` is dropped.
    pub fn emplace(&mut self, key: K, value: V) -> (usize, bool) {
        self.rehash_for_emplace();
        let index = self.find_slot(&key);
        if matches!(self.slots[index], Slot::Used(..)) {
            return (index, false);
        }
        self.occupy(index, key, value);
        (index, true)
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.rehash_for_emplace();
        let index = self.find_slot(&key);
        if let Slot::Used(_, v) = &mut self.slots[index] {
            return Some(std::mem::replace(v, value));
        }
        self.occupy(index, key, value);
        None
    }

    /// Returns the value for `key`, inserting `make()` first if absent.
    ///
    /// The flag reports whether an insert happened.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> (&mut V, bool)
    where
        F: FnOnce() -> V,
    {
        self.rehash_for_emplace();
        let index = self.find_slot(&key);
        let inserted = !matches!(self.slots[index], Slot::Used(..));
        if inserted {
            self.occupy(index, key, make());
        }
        (self.used_value_mut(index), inserted)
    }

    fn occupy(&mut self, index: usize, key: K, value: V) {
        if matches!(self.slots[index], Slot::Deleted) {
            self.deleted -= 1;
        }
        self.slots[index] = Slot::Used(key, value);
        self.len += 1;
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.find_used_slot(key)?;
        self.erase(index).map(|(_, v)| v)
    }

    /// Returns a reference to the value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_used_slot(key)?;
        self.slot(index).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find_used_slot(key)?;
        match &mut self.slots[index] {
            Slot::Used(_, v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HashTableError::KeyNotFound`] if `key` is absent.
    pub fn at(&self, key: &K) -> Result<&V>
    where
        K: fmt::Debug,
    {
        self.get(key).ok_or_else(|| HashTableError::KeyNotFound {
            key: format!("{:?}", key),
        })
    }

    /// Reallocates to `next_size(n)` buckets and reinserts every live entry.
    ///
    /// Tombstones are dropped. `n` is raised to `len()` if smaller.
    pub fn rehash(&mut self, n: usize) {
        let buckets = next_size(n.max(self.len));
        tracing::trace!(
            from = self.slots.len(),
            to = buckets,
            len = self.len,
            deleted = self.deleted,
            "Rehashing open address map"
        );
        let old = std::mem::replace(&mut self.slots, Vec::with_capacity(buckets));
        self.slots.resize_with(buckets, || Slot::Empty);
        self.len = 0;
        self.deleted = 0;
        for slot in old {
            if let Slot::Used(k, v) = slot {
                let index = self.find_slot(&k);
                self.occupy(index, k, v);
            }
        }
    }

    /// Makes room for at least `n` entries without further rehashing.
    ///
    /// Never shrinks.
    pub fn reserve(&mut self, n: usize) {
        if n + self.deleted >= rehash_threshold(self.slots.len()) {
            let buckets = next_size(n);
            if buckets > self.slots.len() || self.slots.is_empty() {
                self.rehash(n);
            }
        }
    }
}

impl<K, V, H> PartialEq for OpenAddressHashMap<K, V, H>
where
    K: Eq,
    V: PartialEq,
    H: SlotHasher<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: fmt::Debug, V: fmt::Debug, H> fmt::Debug for OpenAddressHashMap<K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Eq, V, H: SlotHasher<K> + Default> FromIterator<(K, V)> for OpenAddressHashMap<K, V, H> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Iterator over `(&K, &V)` in bucket order.
pub struct Iter<'a, K, V> {
    inner: std::slice::Iter<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find_map(|slot| match slot {
            Slot::Used(k, v) => Some((k, v)),
            _ => None,
        })
    }
}

/// Iterator over `(&K, &mut V)` in bucket order.
pub struct IterMut<'a, K, V> {
    inner: std::slice::IterMut<'a, Slot<K, V>>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find_map(|slot| match slot {
            Slot::Used(k, v) => Some((&*k, v)),
            _ => None,
        })
    }
}

/// Owning iterator over `(K, V)` in bucket order.
pub struct IntoIter<K, V> {
    inner: std::vec::IntoIter<Slot<K, V>>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().find_map(|slot| match slot {
            Slot::Used(k, v) => Some((k, v)),
            _ => None,
        })
    }
}

impl<K, V, H> IntoIterator for OpenAddressHashMap<K, V, H> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.slots.into_iter(),
        }
    }
}

impl<'a, K, V, H> IntoIterator for &'a OpenAddressHashMap<K, V, H> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
