//! Pull requests and sparse row entries.
//!
//! A [`PullRequest`] names the dense tensors and the sparse rows a worker
//! wants for one batch. [`RowEntry`] is the per-row record used when rows are
//! looked up one by one: a `(name, row id)` key and either the row's values
//! or an explicit "absent" marker.
//!
//! # Example
//!
//! ```
//! use shardps_core::codec::{decode_exact, encode_to_vec};
//! use shardps_ps::PullRequest;
//!
//! let mut request = PullRequest::new(true);
//! request.add_dense("bias");
//! request.add_sparse("emb", [3, 5, 3]);
//!
//! let back: PullRequest = decode_exact(&encode_to_vec(&request)).unwrap();
//! assert_eq!(back.sparse_ids["emb"].len(), 2);
//! ```

use std::borrow::Cow;

use hashbrown::{HashMap, HashSet};
use shardps_core::codec::{Decode, DecodeView, Encode, Reader, Writer};
use shardps_core::{CoreError, RowId};

/// Value-size word marking a row that was looked up but does not exist.
pub const ABSENT_ROW: u64 = u64::MAX;

/// The tensors and rows a worker asks a server for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullRequest {
    /// Training pulls create missing rows; prediction pulls skip them.
    pub is_train: bool,
    /// Dense tensors to pull.
    pub dense_names: HashSet<String>,
    /// Sparse rows to pull, per sparse tensor name.
    pub sparse_ids: HashMap<String, HashSet<RowId>>,
    /// Occurrence counts of row ids in the batch.
    pub id_freq: HashMap<RowId, u32>,
}

impl PullRequest {
    /// Creates an empty request.
    pub fn new(is_train: bool) -> Self {
        Self {
            is_train,
            ..Self::default()
        }
    }

    /// Returns `true` if nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.dense_names.is_empty() && self.sparse_ids.values().all(HashSet::is_empty)
    }

    /// Empties the request, keeping `is_train`.
    pub fn clear(&mut self) {
        self.dense_names.clear();
        self.sparse_ids.clear();
        self.id_freq.clear();
    }

    /// Requests the dense tensor `name`.
    pub fn add_dense(&mut self, name: impl Into<String>) {
        self.dense_names.insert(name.into());
    }

    /// Requests rows `ids` of the sparse tensor `name`.
    pub fn add_sparse(&mut self, name: impl Into<String>, ids: impl IntoIterator<Item = RowId>) {
        self.sparse_ids.entry(name.into()).or_default().extend(ids);
    }

    /// Adds `count` occurrences of row `id`.
    pub fn add_freq(&mut self, id: RowId, count: u32) {
        let freq = self.id_freq.entry(id).or_insert(0);
        *freq = freq.saturating_add(count);
    }

    /// Returns the total number of requested sparse rows.
    pub fn num_sparse_ids(&self) -> usize {
        self.sparse_ids.values().map(HashSet::len).sum()
    }
}

// Layout: i32 is_train, set<string> dense_names,
// map<string, set<u64>> sparse_ids, map<u64, u32> id_freq.
impl Encode for PullRequest {
    fn encode(&self, w: &mut Writer) {
        w.put_i32(i32::from(self.is_train));
        w.put(&self.dense_names);
        w.put(&self.sparse_ids);
        w.put(&self.id_freq);
    }
}

impl Decode for PullRequest {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        let is_train = r.read_i32()? != 0;
        Ok(Self {
            is_train,
            dense_names: r.get()?,
            sparse_ids: r.get()?,
            id_freq: r.get()?,
        })
    }
}

/// One looked-up sparse row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntry<'a> {
    /// Name of the sparse tensor.
    pub name: Cow<'a, str>,
    /// The row id.
    pub id: RowId,
    /// The row's values, or `None` if the row does not exist.
    pub values: Option<Cow<'a, [f32]>>,
}

impl<'a> RowEntry<'a> {
    /// Creates an entry for a row that exists.
    pub fn found(name: impl Into<Cow<'a, str>>, id: RowId, values: impl Into<Cow<'a, [f32]>>) -> Self {
        Self {
            name: name.into(),
            id,
            values: Some(values.into()),
        }
    }

    /// Creates an entry for a row that does not exist.
    pub fn absent(name: impl Into<Cow<'a, str>>, id: RowId) -> Self {
        Self {
            name: name.into(),
            id,
            values: None,
        }
    }

    /// Returns `true` if the row does not exist.
    pub fn is_absent(&self) -> bool {
        self.values.is_none()
    }

    /// Returns an entry that owns its name and values.
    pub fn into_owned(self) -> RowEntry<'static> {
        RowEntry {
            name: Cow::Owned(self.name.into_owned()),
            id: self.id,
            values: self.values.map(|v| Cow::Owned(v.into_owned())),
        }
    }
}

// Layout: u64 key_size, key (name bytes, u64 id), u64 value_size or
// ABSENT_ROW, value bytes.
impl Encode for RowEntry<'_> {
    fn encode(&self, w: &mut Writer) {
        w.put_len(self.name.len() + std::mem::size_of::<RowId>());
        w.put_raw(self.name.as_bytes());
        w.put_u64(self.id);
        match &self.values {
            Some(values) => {
                w.put_len(values.len() * std::mem::size_of::<f32>());
                w.put_f32_raw(values);
            }
            None => {
                w.put_u64(ABSENT_ROW);
            }
        }
    }
}

impl<'a> DecodeView<'a> for RowEntry<'a> {
    fn decode_view(r: &mut Reader<'a>) -> shardps_core::Result<Self> {
        let key_size = r.read_len()?;
        let name_len = key_size
            .checked_sub(std::mem::size_of::<RowId>())
            .ok_or_else(|| CoreError::invalid(format!("row key size {}", key_size)))?;
        let name = std::str::from_utf8(r.read_raw(name_len)?).map_err(|_| CoreError::InvalidUtf8)?;
        let id = r.read_u64()?;

        let value_size = r.read_u64()?;
        if value_size == ABSENT_ROW {
            return Ok(RowEntry::absent(name, id));
        }
        let value_size = usize::try_from(value_size)
            .map_err(|_| CoreError::LengthOverflow { length: value_size })?;
        if value_size % std::mem::size_of::<f32>() != 0 {
            return Err(CoreError::invalid(format!(
                "row value size {} is not a whole number of floats",
                value_size
            )));
        }
        let values = r.read_f32_view(value_size / std::mem::size_of::<f32>())?;
        Ok(RowEntry {
            name: Cow::Borrowed(name),
            id,
            values: Some(values),
        })
    }
}

impl Decode for RowEntry<'static> {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        RowEntry::decode_view(r).map(RowEntry::into_owned)
    }
}

/// Writes `u64 count` followed by each entry.
pub fn encode_row_entries(w: &mut Writer, entries: &[RowEntry<'_>]) {
    w.put_len(entries.len());
    for entry in entries {
        entry.encode(w);
    }
}

/// Reads entries written by [`encode_row_entries`], borrowing from `r`.
pub fn decode_row_entries<'a>(r: &mut Reader<'a>) -> shardps_core::Result<Vec<RowEntry<'a>>> {
    let n = r.read_len()?;
    let mut entries = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        entries.push(RowEntry::decode_view(r)?);
    }
    Ok(entries)
}

/// A batch of `(sparse tensor name, row id)` keys to look up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowLookupRequest {
    /// The keys, in the order the answers should come back.
    pub keys: Vec<(String, RowId)>,
}

impl Encode for RowLookupRequest {
    fn encode(&self, w: &mut Writer) {
        w.put(&self.keys);
    }
}

impl Decode for RowLookupRequest {
    fn decode(r: &mut Reader<'_>) -> shardps_core::Result<Self> {
        Ok(Self { keys: r.get()? })
    }
}
