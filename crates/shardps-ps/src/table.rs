//! The parameter table held by one server.
//!
//! A [`ParameterTable`] stores every named dense tensor and sparse row store
//! a server owns, one [`RwLock`] per entry. Exclusive access through
//! `&mut self` bypasses the locks and can hand out zero-copy views
//! ([`pull`](ParameterTable::pull)); shared access goes through the locks
//! and copies ([`pull_locked`](ParameterTable::pull_locked)).
//!
//! # Example
//!
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use shardps_core::InitializerConfig;
//! use shardps_ps::{ParamDecl, ParameterTable, PullRequest, Shard};
//! use shardps_tensor::Shape;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let mut table = ParameterTable::new(Shard::non_shard());
//! table
//!     .init_param(
//!         &mut rng,
//!         &[
//!             ParamDecl::dense("bias", Shape::vector(4), InitializerConfig::zeros()),
//!             ParamDecl::sparse("emb", 1000, 8, InitializerConfig::ones()).unwrap(),
//!         ],
//!     )
//!     .unwrap();
//!
//! let mut request = PullRequest::new(true);
//! request.add_dense("bias");
//! request.add_sparse("emb", [3, 9]);
//! let pulled = table.pull(&mut rng, &request).unwrap();
//! assert_eq!(pulled.sparse("emb").unwrap().find_row(9), Some(&[1.0; 8][..]));
//! ```

use hashbrown::{HashMap, HashSet};
use parking_lot::{RwLock, RwLockReadGuard};
use rand::RngCore;
use shardps_core::codec::{Reader, Writer};
use shardps_core::{InitializerConfig, RowId};
use shardps_hash_table::{rand_init, SparseRowStore};
use shardps_tensor::{DenseTensor, Shape};

use crate::error::{PsError, Result};
use crate::pull::{PullRequest, RowEntry, RowLookupRequest};
use crate::shard::Shard;
use crate::tensor_map::{encode_named_entry, TensorEntry, TensorMap};

/// Version word written ahead of a persisted table.
pub const TABLE_VERSION: i32 = 0;

/// Fewest rows reserved for a newly declared sparse tensor.
pub const MIN_RESERVED_ROWS: usize = 10_000;

/// Most rows reserved for a newly declared sparse tensor.
pub const MAX_RESERVED_ROWS: usize = 1_000_000_000;

/// Kind of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A dense tensor.
    Dense,
    /// A sparse row store.
    Sparse,
}

/// Declaration of one parameter to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    /// Tensor name.
    pub name: String,
    /// Dense or sparse.
    pub kind: ParamKind,
    /// Dense shape, or `(rows, col)` for a sparse tensor where `rows` is a
    /// capacity hint and may be [`DIM_ANY`](shardps_tensor::DIM_ANY).
    pub shape: Shape,
    /// How values are initialized.
    pub initializer: InitializerConfig,
}

impl ParamDecl {
    /// Declares a dense tensor.
    pub fn dense(name: impl Into<String>, shape: Shape, initializer: InitializerConfig) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Dense,
            shape,
            initializer,
        }
    }

    /// Declares a sparse tensor with `col` values per row and a capacity
    /// hint of `rows`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::Tensor`] if `(rows, col)` is not a valid shape.
    pub fn sparse(
        name: impl Into<String>,
        rows: i32,
        col: i32,
        initializer: InitializerConfig,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            kind: ParamKind::Sparse,
            shape: Shape::try_new(vec![rows, col])?,
            initializer,
        })
    }

    fn column_width(&self) -> Result<usize> {
        if self.shape.rank() != 2 || self.shape.dim(1) <= 0 {
            return Err(PsError::config(format!(
                "sparse parameter {} needs a (rows, col) shape, got {}",
                self.name, self.shape
            )));
        }
        Ok(self.shape.dim(1) as usize)
    }

    fn reserved_rows(&self) -> usize {
        let rows = usize::try_from(self.shape.dim(0)).unwrap_or(0);
        rows.clamp(MIN_RESERVED_ROWS, MAX_RESERVED_ROWS)
    }
}

/// Named tensors owned by one server.
#[derive(Debug, Default)]
pub struct ParameterTable {
    entries: HashMap<String, RwLock<TensorEntry<'static>>>,
    shard: Shard,
}

/// Returns `false`, logging why, if `remote` cannot be applied to `local`.
fn check_compatible(name: &str, local: &TensorEntry<'_>, remote: &TensorEntry<'_>) -> bool {
    let mismatch = match (local, remote) {
        (TensorEntry::Dense(a), TensorEntry::Dense(b)) => (a.shape() != b.shape())
            .then(|| format!("shape {} vs {}", a.shape(), b.shape())),
        (TensorEntry::Sparse(a), TensorEntry::Sparse(b)) => (a.column_width() != b.column_width())
            .then(|| format!("column width {} vs {}", a.column_width(), b.column_width())),
        _ => Some(format!(
            "type {} vs {}",
            local.tensor_type().name(),
            remote.tensor_type().name()
        )),
    };
    match mismatch {
        Some(mismatch) => {
            tracing::warn!(name = %name, "Skipping tensor with inconsistent {}", mismatch);
            false
        }
        None => true,
    }
}

fn apply_update(name: &str, local: &mut TensorEntry<'_>, remote: &TensorEntry<'_>) -> Result<()> {
    if !check_compatible(name, local, remote) {
        return Ok(());
    }
    match (local, remote) {
        (TensorEntry::Dense(local), TensorEntry::Dense(remote)) => local.set_from(remote)?,
        (TensorEntry::Sparse(local), TensorEntry::Sparse(remote)) => local.upsert(remote)?,
        _ => {}
    }
    Ok(())
}

impl ParameterTable {
    /// Creates an empty table for `shard`.
    pub fn new(shard: Shard) -> Self {
        Self {
            entries: HashMap::new(),
            shard,
        }
    }

    /// Creates a table holding every entry of `map`.
    pub fn from_tensor_map(map: TensorMap<'static>, shard: Shard) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(name, entry)| (name, RwLock::new(entry)))
                .collect(),
            shard,
        }
    }

    /// Returns the entries as a [`TensorMap`].
    pub fn into_tensor_map(self) -> TensorMap<'static> {
        self.entries
            .into_iter()
            .map(|(name, lock)| (name, lock.into_inner()))
            .collect()
    }

    /// Returns the shard this table belongs to.
    pub fn shard(&self) -> &Shard {
        &self.shard
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

    /// Iterates over entry names in unspecified order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Read-locks and returns the entry named `name`.
    pub fn get(&self, name: &str) -> Option<RwLockReadGuard<'_, TensorEntry<'static>>> {
        self.entries.get(name).map(RwLock::read)
    }

    /// Returns the entry named `name` without locking.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut TensorEntry<'static>> {
        self.entries.get_mut(name).map(RwLock::get_mut)
    }

    /// Inserts an entry, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        entry: impl Into<TensorEntry<'static>>,
    ) -> Option<TensorEntry<'static>> {
        self.entries
            .insert(name.into(), RwLock::new(entry.into()))
            .map(RwLock::into_inner)
    }

    /// Removes and returns the entry named `name`.
    pub fn remove(&mut self, name: &str) -> Option<TensorEntry<'static>> {
        self.entries.remove(name).map(RwLock::into_inner)
    }

    /// Creates every declared entry that does not exist yet, without
    /// drawing random values.
    ///
    /// Dense entries are zero-filled; sparse entries get their width and
    /// initializer and no rows.
    ///
    /// # Errors
    ///
    /// Fails on a non-concrete dense shape, a sparse shape that is not
    /// `(rows, col)`, or an initializer sparse rows cannot use.
    pub fn init_param_placeholder(&mut self, decls: &[ParamDecl]) -> Result<()> {
        for decl in decls {
            if self.entries.contains_key(decl.name.as_str()) {
                continue;
            }
            let entry = match decl.kind {
                ParamKind::Dense => TensorEntry::Dense(DenseTensor::zeros(decl.shape.clone())?),
                ParamKind::Sparse => TensorEntry::Sparse(SparseRowStore::with_initializer(
                    decl.column_width()?,
                    decl.initializer,
                )?),
            };
            self.entries.insert(decl.name.clone(), RwLock::new(entry));
        }
        Ok(())
    }

    /// Creates and initializes every declared entry this shard owns, then
    /// checks that all of them are present and consistent.
    ///
    /// Existing entries are kept as they are. Dense tensors are allocated and
    /// filled from their initializer; sparse stores get their width,
    /// initializer and a row reservation of the declared row count clamped
    /// to [`MIN_RESERVED_ROWS`]..=[`MAX_RESERVED_ROWS`].
    ///
    /// # Errors
    ///
    /// Returns [`PsError::InitCheckFailed`] for the first missing or
    /// inconsistent entry after logging all of them, and the errors of
    /// [`init_param_placeholder`](Self::init_param_placeholder) for bad
    /// declarations.
    pub fn init_param(&mut self, rng: &mut dyn RngCore, decls: &[ParamDecl]) -> Result<()> {
        for decl in decls {
            if self.entries.contains_key(decl.name.as_str()) {
                continue;
            }
            let entry = match decl.kind {
                ParamKind::Dense => {
                    if !self.shard.has_dense_tensor(&decl.name) {
                        continue;
                    }
                    let mut tensor = DenseTensor::new();
                    tensor.resize(decl.shape.clone())?;
                    rand_init(&mut tensor, rng, &decl.initializer)?;
                    TensorEntry::Dense(tensor)
                }
                ParamKind::Sparse => {
                    let mut store =
                        SparseRowStore::with_initializer(decl.column_width()?, decl.initializer)?;
                    store.reserve(decl.reserved_rows());
                    TensorEntry::Sparse(store)
                }
            };
            tracing::debug!(name = %decl.name, shape = %decl.shape, "Initialized parameter");
            self.entries.insert(decl.name.clone(), RwLock::new(entry));
        }
        self.check_params(decls)
    }

    fn check_params(&self, decls: &[ParamDecl]) -> Result<()> {
        let mut first = None;
        for decl in decls {
            if decl.kind == ParamKind::Dense && !self.shard.has_dense_tensor(&decl.name) {
                continue;
            }
            let problem = match (self.get(&decl.name).as_deref(), decl.kind) {
                (None, _) => Some("not initialized".to_string()),
                (Some(TensorEntry::Dense(tensor)), ParamKind::Dense) => (tensor.shape()
                    != &decl.shape)
                    .then(|| format!("shape {} vs {}", tensor.shape(), decl.shape)),
                (Some(TensorEntry::Sparse(store)), ParamKind::Sparse) => {
                    let col = decl.column_width()?;
                    (store.column_width() != col)
                        .then(|| format!("column width {} vs {}", store.column_width(), col))
                }
                (Some(entry), _) => Some(format!("type {}", entry.tensor_type().name())),
            };
            if let Some(message) = problem {
                tracing::error!(name = %decl.name, "Parameter failed the init check: {}", message);
                first.get_or_insert(PsError::InitCheckFailed {
                    name: decl.name.clone(),
                    message,
                });
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn check_request(&self, request: &PullRequest) -> Result<()> {
        for name in &request.dense_names {
            match self.get(name).as_deref() {
                Some(TensorEntry::Dense(_)) => {}
                Some(TensorEntry::Sparse(_)) => {
                    return Err(PsError::WrongTensorKind {
                        name: name.clone(),
                        expected: "dense",
                    })
                }
                None => return Err(PsError::TensorNotFound { name: name.clone() }),
            }
        }
        for name in request.sparse_ids.keys() {
            match self.get(name).as_deref() {
                Some(TensorEntry::Sparse(_)) => {}
                Some(TensorEntry::Dense(_)) => {
                    return Err(PsError::WrongTensorKind {
                        name: name.clone(),
                        expected: "sparse",
                    })
                }
                None => return Err(PsError::TensorNotFound { name: name.clone() }),
            }
        }
        Ok(())
    }

    /// Answers `request` with views into this table.
    ///
    /// Dense tensors come back as views. A training pull first creates every
    /// missing requested row from its store's initializer; a prediction pull
    /// returns only rows that already exist. Entries with nothing to return
    /// are left out.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::TensorNotFound`] or [`PsError::WrongTensorKind`]
    /// for a bad name, before any row is created.
    pub fn pull<'s>(&'s mut self, rng: &mut dyn RngCore, request: &PullRequest) -> Result<TensorMap<'s>> {
        self.check_request(request)?;
        if request.is_train {
            for (name, ids) in &request.sparse_ids {
                if let Some(TensorEntry::Sparse(store)) = self.get_mut(name) {
                    for &id in ids {
                        store.get_row(rng, id);
                    }
                }
            }
        }

        let entries: HashMap<&'s str, &'s TensorEntry<'static>> = self
            .entries
            .iter_mut()
            .map(|(name, lock)| (name.as_str(), &*RwLock::get_mut(lock)))
            .collect();

        let mut out = TensorMap::new();
        for name in &request.dense_names {
            if let Some(TensorEntry::Dense(tensor)) = entries.get(name.as_str()).copied() {
                out.insert(name.clone(), tensor.get_view());
            }
        }
        for (name, ids) in &request.sparse_ids {
            if let Some(TensorEntry::Sparse(store)) = entries.get(name.as_str()).copied() {
                let mut rows = SparseRowStore::new(store.column_width());
                rows.reserve(ids.len());
                for &id in ids {
                    if let Some(row) = store.find_row(id) {
                        rows.assign_view(id, row)?;
                    }
                }
                out.insert(name.clone(), rows);
            }
        }
        out.remove_empty_values();
        Ok(out)
    }

    /// Like [`pull`](Self::pull) through the entry locks, returning copies.
    ///
    /// Rows are probed under a read lock; a training pull then takes the
    /// write lock once per tensor to create the missing ones.
    pub fn pull_locked(&self, rng: &mut dyn RngCore, request: &PullRequest) -> Result<TensorMap<'static>> {
        self.check_request(request)?;
        let mut out = TensorMap::new();
        for name in &request.dense_names {
            if let Some(TensorEntry::Dense(tensor)) = self.get(name).as_deref() {
                out.insert(name.clone(), tensor.clone().into_owned());
            }
        }
        for (name, ids) in &request.sparse_ids {
            let Some(lock) = self.entries.get(name.as_str()) else {
                continue;
            };
            let mut missing = Vec::new();
            let mut rows = {
                let guard = lock.read();
                let TensorEntry::Sparse(store) = &*guard else {
                    continue;
                };
                let mut rows = SparseRowStore::new(store.column_width());
                rows.reserve(ids.len());
                for &id in ids {
                    match store.find_row(id) {
                        Some(row) => rows.assign(id, row)?,
                        None => missing.push(id),
                    }
                }
                rows
            };
            if request.is_train && !missing.is_empty() {
                if let TensorEntry::Sparse(store) = &mut *lock.write() {
                    for id in missing {
                        rows.assign(id, store.get_row(rng, id))?;
                    }
                }
            }
            out.insert(name.clone(), rows);
        }
        out.remove_empty_values();
        Ok(out)
    }

    /// Replaces the table's values with `params`.
    ///
    /// Every sparse row is removed first. Dense values are then copied in and
    /// sparse rows moved in from each map. Unknown or inconsistent entries
    /// are skipped with a warning.
    pub fn set_param<'p>(&mut self, params: impl IntoIterator<Item = TensorMap<'p>>) -> Result<()> {
        for lock in self.entries.values_mut() {
            if let TensorEntry::Sparse(store) = lock.get_mut() {
                store.clear();
            }
        }
        for param in params {
            for (name, remote) in param {
                let Some(local) = self.get_mut(&name) else {
                    tracing::warn!(name = %name, "Skipping unknown tensor");
                    continue;
                };
                if !check_compatible(&name, local, &remote) {
                    continue;
                }
                match (local, remote) {
                    (TensorEntry::Dense(local), TensorEntry::Dense(remote)) => {
                        local.set_from(&remote)?
                    }
                    (TensorEntry::Sparse(local), TensorEntry::Sparse(remote)) => {
                        local.merge_from(&mut remote.into_owned())?
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Applies `delta`: dense values are overwritten, sparse rows upserted.
    ///
    /// Unknown or inconsistent entries are skipped with a warning.
    pub fn update(&mut self, delta: &TensorMap<'_>) -> Result<()> {
        for (name, remote) in delta {
            match self.get_mut(name) {
                Some(local) => apply_update(name, local, remote)?,
                None => tracing::warn!(name = %name, "Skipping unknown tensor"),
            }
        }
        Ok(())
    }

    /// Like [`update`](Self::update), taking each entry's write lock.
    pub fn update_locked(&self, delta: &TensorMap<'_>) -> Result<()> {
        for (name, remote) in delta {
            match self.entries.get(name.as_str()) {
                Some(lock) => apply_update(name, &mut lock.write(), remote)?,
                None => tracing::warn!(name = %name, "Skipping unknown tensor"),
            }
        }
        Ok(())
    }

    /// Takes over the part of `other` that `other`'s shard owns.
    ///
    /// Dense tensors owned by `other`'s shard replace the local ones; sparse
    /// rows it owns are moved in where no local row exists. Only names
    /// present here are considered.
    pub fn merge(&mut self, other: ParameterTable) -> Result<()> {
        let ParameterTable { entries, shard } = other;
        self.absorb(entries, Some(&shard))
    }

    /// Takes over everything in `other`: dense tensors replace the local
    /// ones, sparse rows are moved in where no local row exists.
    pub fn warmup(&mut self, other: ParameterTable) -> Result<()> {
        self.absorb(other.entries, None)
    }

    fn absorb(
        &mut self,
        entries: HashMap<String, RwLock<TensorEntry<'static>>>,
        owner: Option<&Shard>,
    ) -> Result<()> {
        for (name, lock) in entries {
            let remote = lock.into_inner();
            let Some(local) = self.get_mut(&name) else {
                tracing::debug!(name = %name, "Skipping tensor missing from this table");
                continue;
            };
            if !check_compatible(&name, local, &remote) {
                continue;
            }
            match remote {
                TensorEntry::Dense(tensor) => {
                    if owner.map_or(true, |shard| shard.has_dense_tensor(&name)) {
                        *local = TensorEntry::Dense(tensor);
                    }
                }
                TensorEntry::Sparse(mut store) => {
                    if let TensorEntry::Sparse(local) = local {
                        match owner {
                            Some(shard) => local
                                .merge_from_if(&mut store, |id| shard.has_sparse_row(&name, id))?,
                            None => local.merge_from(&mut store)?,
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Splits `request` into one request per shard of `shard_size`.
    ///
    /// Every part keeps `is_train`. Frequencies follow their row ids.
    pub fn split_pull_request(&self, request: &PullRequest, shard_size: u32) -> Vec<PullRequest> {
        let mut parts: Vec<PullRequest> = (0..shard_size)
            .map(|_| PullRequest::new(request.is_train))
            .collect();
        if parts.is_empty() {
            return parts;
        }
        for name in &request.dense_names {
            parts[self.shard.shard_of_dense(name, shard_size) as usize].add_dense(name.clone());
        }
        for (name, ids) in &request.sparse_ids {
            let mut by_shard = vec![HashSet::new(); parts.len()];
            for &id in ids {
                by_shard[self.shard.shard_of_sparse(name, id, shard_size) as usize].insert(id);
            }
            for (part, ids) in parts.iter_mut().zip(by_shard) {
                if !ids.is_empty() {
                    part.add_sparse(name.clone(), ids);
                }
            }
        }
        for part in &mut parts {
            let PullRequest {
                sparse_ids, id_freq, ..
            } = part;
            for id in sparse_ids.values().flatten() {
                if let Some(&count) = request.id_freq.get(id) {
                    id_freq.insert(*id, count);
                }
            }
        }
        parts
    }

    fn split_rows<'p>(
        &self,
        name: &str,
        store: &'p SparseRowStore<'_>,
        shard_size: u32,
    ) -> Result<Vec<SparseRowStore<'p>>> {
        let mut parts = Vec::with_capacity(shard_size as usize);
        for _ in 0..shard_size {
            let mut part = SparseRowStore::new(store.column_width());
            part.set_initializer(store.initializer().copied())?;
            parts.push(part);
        }
        for (id, row) in store.iter() {
            parts[self.shard.shard_of_sparse(name, id, shard_size) as usize].assign_view(id, row)?;
        }
        Ok(parts)
    }

    /// Splits a full parameter set into one view map per shard.
    ///
    /// Each dense tensor goes to its owner. Every shard gets an entry for
    /// each sparse tensor, holding the rows it owns.
    pub fn split_param<'p>(&self, param: &'p TensorMap<'_>, shard_size: u32) -> Result<Vec<TensorMap<'p>>> {
        let mut parts: Vec<TensorMap<'p>> = (0..shard_size).map(|_| TensorMap::new()).collect();
        if parts.is_empty() {
            return Ok(parts);
        }
        for (name, entry) in param {
            match entry {
                TensorEntry::Dense(tensor) => {
                    let shard = self.shard.shard_of_dense(name, shard_size) as usize;
                    parts[shard].insert(name.clone(), tensor.get_view());
                }
                TensorEntry::Sparse(store) => {
                    for (part, rows) in parts.iter_mut().zip(self.split_rows(name, store, shard_size)?) {
                        part.insert(name.clone(), rows);
                    }
                }
            }
        }
        Ok(parts)
    }

    /// Splits gradients into one view map per shard.
    ///
    /// A dense gradient goes to its tensor's owner, and so does a sparse
    /// gradient of a tensor that is dense in `param`. Any other sparse
    /// gradient is split by row.
    pub fn split_grad<'g>(
        &self,
        param: &TensorMap<'_>,
        grad: &'g TensorMap<'_>,
        shard_size: u32,
    ) -> Result<Vec<TensorMap<'g>>> {
        let mut parts: Vec<TensorMap<'g>> = (0..shard_size).map(|_| TensorMap::new()).collect();
        if parts.is_empty() {
            return Ok(parts);
        }
        for (name, entry) in grad {
            match entry {
                TensorEntry::Dense(tensor) => {
                    let shard = self.shard.shard_of_dense(name, shard_size) as usize;
                    parts[shard].insert(name.clone(), tensor.get_view());
                }
                TensorEntry::Sparse(store) if matches!(param.get(name), Some(TensorEntry::Dense(_))) => {
                    let mut rows = SparseRowStore::new(store.column_width());
                    rows.reserve(store.len());
                    for (id, row) in store.iter() {
                        rows.assign_view(id, row)?;
                    }
                    let shard = self.shard.shard_of_dense(name, shard_size) as usize;
                    parts[shard].insert(name.clone(), rows);
                }
                TensorEntry::Sparse(store) => {
                    for (part, rows) in parts.iter_mut().zip(self.split_rows(name, store, shard_size)?) {
                        if !rows.is_empty() {
                            part.insert(name.clone(), rows);
                        }
                    }
                }
            }
        }
        Ok(parts)
    }

    /// Removes every all-zero sparse row. Returns the number removed.
    pub fn remove_zeros_sparse(&mut self) -> usize {
        let mut total = 0;
        for (name, lock) in self.entries.iter_mut() {
            if let TensorEntry::Sparse(store) = lock.get_mut() {
                let removed = store.remove_zeros();
                tracing::info!(
                    name = %name,
                    removed,
                    remaining = store.len(),
                    "Removed zero rows"
                );
                total += removed;
            }
        }
        total
    }

    /// Calls `f` with each sparse store under its read lock.
    pub fn for_each_sparse<F>(&self, mut f: F)
    where
        F: FnMut(&str, &SparseRowStore<'static>),
    {
        for (name, lock) in &self.entries {
            if let TensorEntry::Sparse(store) = &*lock.read() {
                f(name, store);
            }
        }
    }

    /// Copies out the requested rows, marking the ones that do not exist.
    ///
    /// A key naming a dense or unknown tensor is answered as absent.
    pub fn lookup_rows(&self, request: &RowLookupRequest) -> Vec<RowEntry<'static>> {
        request
            .keys
            .iter()
            .map(|(name, id)| {
                let row = match self.get(name).as_deref() {
                    Some(TensorEntry::Sparse(store)) => store.find_row(*id).map(<[f32]>::to_vec),
                    _ => None,
                };
                match row {
                    Some(values) => RowEntry::found(name.clone(), *id, values),
                    None => RowEntry::absent(name.clone(), *id),
                }
            })
            .collect()
    }

    /// Returns the number of rows of sparse tensor `name`.
    pub fn num_rows(&self, name: &str) -> Option<usize> {
        match self.get(name).as_deref() {
            Some(TensorEntry::Sparse(store)) => Some(store.len()),
            _ => None,
        }
    }

    /// Serializes the table: `i32` version, then the entries as a
    /// [`TensorMap`].
    pub fn write(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_i32(TABLE_VERSION);
        w.put_len(self.entries.len());
        for (name, lock) in &self.entries {
            encode_named_entry(&mut w, name, &lock.read());
        }
        w.as_slice().to_vec()
    }

    /// Replaces every entry with the ones serialized in `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::UnsupportedVersion`] for any version other than
    /// [`TABLE_VERSION`] and [`PsError::Core`] for malformed bytes. The table
    /// is unchanged on failure.
    pub fn read(&mut self, bytes: &[u8]) -> Result<()> {
        let mut r = Reader::new(bytes);
        let version = r.read_i32()?;
        if version != TABLE_VERSION {
            return Err(PsError::UnsupportedVersion { version });
        }
        let map = r.get::<TensorMap<'static>>()?;
        r.finish()?;
        self.entries = map
            .into_iter()
            .map(|(name, entry)| (name, RwLock::new(entry)))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shardps_tensor::DIM_ANY;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    fn decls() -> Vec<ParamDecl> {
        vec![
            ParamDecl::dense("w", Shape::matrix(2, 3), InitializerConfig::ones()),
            ParamDecl::sparse("emb", 100, 4, InitializerConfig::constant(0.5)).unwrap(),
        ]
    }

    fn table() -> ParameterTable {
        let mut table = ParameterTable::new(Shard::non_shard());
        table.init_param(&mut rng(), &decls()).unwrap();
        table
    }

    fn sparse(col: usize, rows: &[(RowId, &[f32])]) -> SparseRowStore<'static> {
        let mut store = SparseRowStore::new(col);
        for &(id, values) in rows {
            store.assign(id, values).unwrap();
        }
        store
    }

    #[test]
    fn test_init_param() {
        let table = table();
        assert_eq!(table.len(), 2);
        match table.get("w").as_deref() {
            Some(TensorEntry::Dense(tensor)) => assert_eq!(tensor.as_slice(), &[1.0; 6]),
            other => panic!("unexpected entry: {other:?}"),
        }
        match table.get("emb").as_deref() {
            Some(TensorEntry::Sparse(store)) => {
                assert!(store.is_empty());
                assert_eq!(store.column_width(), 4);
                assert_eq!(store.initializer(), Some(&InitializerConfig::constant(0.5)));
            }
            other => panic!("unexpected entry: {other:?}"),
        };
    }

    #[test]
    fn test_init_param_keeps_existing() {
        let mut table = table();
        if let Some(TensorEntry::Dense(tensor)) = table.get_mut("w") {
            tensor.fill(3.0).unwrap();
        }
        table.init_param(&mut rng(), &decls()).unwrap();
        assert!(table.get("w").unwrap().as_dense().unwrap().as_slice().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_init_param_skips_unowned_dense() {
        let registry = ShardRegistry::default();
        let names: Vec<String> = (0..8).map(|i| format!("dense/{i}")).collect();
        let decls: Vec<ParamDecl> = names
            .iter()
            .map(|name| ParamDecl::dense(name.as_str(), Shape::vector(2), InitializerConfig::zeros()))
            .chain([ParamDecl::sparse("emb", -1, 2, InitializerConfig::zeros()).unwrap()])
            .collect();

        let mut total = 0;
        for id in 0..2 {
            let shard = Shard::new(id, 2, "default", &registry).unwrap();
            let mut table = ParameterTable::new(shard.clone());
            table.init_param(&mut rng(), &decls).unwrap();
            assert!(table.contains("emb"));
            for name in &names {
                assert_eq!(table.contains(name), shard.has_dense_tensor(name));
            }
            total += table.len() - 1;
        }
        assert_eq!(total, names.len());
    }

    #[test]
    fn test_init_param_reports_inconsistency() {
        let mut table = ParameterTable::new(Shard::non_shard());
        table.insert("w", DenseTensor::zeros(Shape::matrix(3, 2)).unwrap());
        let err = table.init_param(&mut rng(), &decls()).unwrap_err();
        match err {
            PsError::InitCheckFailed { name, message } => {
                assert_eq!(name, "w");
                assert_eq!(message, "shape (3, 2) vs (2, 3)");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let mut table = ParameterTable::new(Shard::non_shard());
        table.insert("emb", DenseTensor::zeros(Shape::vector(4)).unwrap());
        let err = table.init_param(&mut rng(), &decls()).unwrap_err();
        assert!(matches!(err, PsError::InitCheckFailed { name, .. } if name == "emb"));
    }

    #[test]
    fn test_init_param_rejects_bad_sparse_shape() {
        let mut table = ParameterTable::new(Shard::non_shard());
        let decl = ParamDecl {
            shape: Shape::vector(4),
            ..ParamDecl::sparse("emb", 1, 4, InitializerConfig::zeros()).unwrap()
        };
        assert!(matches!(
            table.init_param(&mut rng(), &[decl]),
            Err(PsError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_sparse_decl_rejects_invalid_dims() {
        assert!(matches!(
            ParamDecl::sparse("emb", -5, 4, InitializerConfig::zeros()),
            Err(PsError::Tensor(_))
        ));
        assert!(ParamDecl::sparse("emb", 1 << 20, 1 << 20, InitializerConfig::zeros()).is_err());
        let decl = ParamDecl::sparse("emb", DIM_ANY, 4, InitializerConfig::zeros()).unwrap();
        assert_eq!(decl.shape.as_slice(), &[DIM_ANY, 4]);
    }

    #[test]
    fn test_init_param_placeholder() {
        let mut table = ParameterTable::new(Shard::non_shard());
        table.init_param_placeholder(&decls()).unwrap();
        assert!(table.get("w").unwrap().as_dense().unwrap().is_all_zero());
        assert_eq!(table.num_rows("emb"), Some(0));
    }

    #[test]
    fn test_pull_train_views_alias_table() {
        let mut table = table();
        let dense_ptr = table.get_mut("w").unwrap().as_dense().unwrap().as_ptr();

        let mut request = PullRequest::new(true);
        request.add_dense("w");
        request.add_sparse("emb", [1, 2]);

        let row_ptr = {
            let out = table.pull(&mut rng(), &request).unwrap();
            let tensor = out.dense("w").unwrap();
            assert!(tensor.is_view());
            assert_eq!(tensor.as_ptr(), dense_ptr);
            let rows = out.sparse("emb").unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows.find_row(2), Some(&[0.5; 4][..]));
            rows.find_row(1).unwrap().as_ptr()
        };

        assert_eq!(table.num_rows("emb"), Some(2));
        let stored = table.get("emb").unwrap();
        assert_eq!(stored.as_sparse().unwrap().find_row(1).unwrap().as_ptr(), row_ptr);
    }

    #[test]
    fn test_pull_predict_skips_missing_rows() {
        let mut table = table();
        let mut request = PullRequest::new(false);
        request.add_sparse("emb", [5, 6]);
        assert!(table.pull(&mut rng(), &request).unwrap().is_empty());
        assert_eq!(table.num_rows("emb"), Some(0));

        if let Some(TensorEntry::Sparse(store)) = table.get_mut("emb") {
            store.assign(6, &[2.0; 4]).unwrap();
        }
        let out = table.pull(&mut rng(), &request).unwrap();
        let rows = out.sparse("emb").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.find_row(6), Some(&[2.0; 4][..]));
    }

    #[test]
    fn test_pull_rejects_bad_names() {
        let mut table = table();
        let mut request = PullRequest::new(true);
        request.add_sparse("missing", [1]);
        assert!(matches!(
            table.pull(&mut rng(), &request),
            Err(PsError::TensorNotFound { .. })
        ));

        let mut request = PullRequest::new(true);
        request.add_sparse("emb", [1]);
        request.add_dense("emb");
        assert!(matches!(
            table.pull_locked(&mut rng(), &request),
            Err(PsError::WrongTensorKind { expected: "dense", .. })
        ));
        assert_eq!(table.num_rows("emb"), Some(0));
    }

    #[test]
    fn test_pull_locked_copies() {
        let table = table();
        let mut request = PullRequest::new(true);
        request.add_dense("w");
        request.add_sparse("emb", [1, 2, 3]);

        let out = table.pull_locked(&mut rng(), &request).unwrap();
        assert!(!out.dense("w").unwrap().is_view());
        assert_eq!(out.sparse("emb").unwrap().len(), 3);
        assert_eq!(table.num_rows("emb"), Some(3));

        let mut predict = PullRequest::new(false);
        predict.add_sparse("emb", [3, 4]);
        let out = table.pull_locked(&mut rng(), &predict).unwrap();
        let rows = out.sparse("emb").unwrap();
        assert_eq!(rows.ids().collect::<Vec<_>>(), vec![3]);
        assert_eq!(table.num_rows("emb"), Some(3));
    }

    #[test]
    fn test_update_overwrites_and_skips_mismatch() {
        let mut table = table();
        let mut delta = TensorMap::new();
        delta.insert("w", DenseTensor::from_vec(Shape::matrix(2, 3), vec![2.0; 6]).unwrap());
        delta.insert("emb", sparse(4, &[(1, &[1.0; 4])]));
        table.update(&delta).unwrap();
        assert_eq!(table.get("w").unwrap().as_dense().unwrap().as_slice(), &[2.0; 6]);

        let mut delta = TensorMap::new();
        delta.insert("w", DenseTensor::from_vec(Shape::vector(6), vec![9.0; 6]).unwrap());
        delta.insert("emb", sparse(4, &[(1, &[4.0; 4]), (2, &[5.0; 4])]));
        delta.insert("unknown", DenseTensor::zeros(Shape::vector(1)).unwrap());
        table.update_locked(&delta).unwrap();

        assert_eq!(table.get("w").unwrap().as_dense().unwrap().as_slice(), &[2.0; 6]);
        let stored = table.get("emb").unwrap();
        let store = stored.as_sparse().unwrap();
        assert_eq!(store.find_row(1), Some(&[4.0; 4][..]));
        assert_eq!(store.find_row(2), Some(&[5.0; 4][..]));
    }

    #[test]
    fn test_set_param_replaces_rows() {
        let mut table = table();
        if let Some(TensorEntry::Sparse(store)) = table.get_mut("emb") {
            store.assign(1, &[1.0; 4]).unwrap();
        }

        let mut first = TensorMap::new();
        first.insert("emb", sparse(4, &[(3, &[3.0; 4])]));
        let mut second = TensorMap::new();
        second.insert("emb", sparse(4, &[(4, &[4.0; 4])]));
        second.insert("w", DenseTensor::from_vec(Shape::matrix(2, 3), vec![7.0; 6]).unwrap());
        table.set_param(vec![first, second]).unwrap();

        let stored = table.get("emb").unwrap();
        let mut ids: Vec<RowId> = stored.as_sparse().unwrap().ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 4]);
        drop(stored);
        assert_eq!(table.get("w").unwrap().as_dense().unwrap().as_slice(), &[7.0; 6]);
    }

    #[test]
    fn test_merge_takes_owned_part() {
        let registry = ShardRegistry::default();
        let source_shard = Shard::new(1, 2, "default", &registry).unwrap();
        let mut source = ParameterTable::new(source_shard.clone());
        source.insert("w", DenseTensor::from_vec(Shape::matrix(2, 3), vec![5.0; 6]).unwrap());
        let mut rows = SparseRowStore::new(4);
        for id in 0..10 {
            rows.assign(id, &[id as f32; 4]).unwrap();
        }
        source.insert("emb", rows);

        let mut target = table();
        if let Some(TensorEntry::Sparse(store)) = target.get_mut("emb") {
            store.assign(3, &[-1.0; 4]).unwrap();
        }
        target.merge(source).unwrap();

        let stored = target.get("emb").unwrap();
        let store = stored.as_sparse().unwrap();
        let mut ids: Vec<RowId> = store.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3, 5, 7, 9]);
        assert_eq!(store.find_row(3), Some(&[-1.0; 4][..]));
        drop(stored);

        let expected = if source_shard.has_dense_tensor("w") { 5.0 } else { 1.0 };
        assert_eq!(table_value(&target, "w"), expected);
    }

    fn table_value(table: &ParameterTable, name: &str) -> f32 {
        table.get(name).unwrap().as_dense().unwrap().as_slice()[0]
    }

    #[test]
    fn test_warmup_takes_everything() {
        let mut source = ParameterTable::new(Shard::non_shard());
        source.insert("w", DenseTensor::from_vec(Shape::matrix(2, 3), vec![5.0; 6]).unwrap());
        source.insert("emb", sparse(4, &[(1, &[1.0; 4]), (2, &[2.0; 4])]));
        source.insert("extra", DenseTensor::zeros(Shape::vector(1)).unwrap());

        let mut target = table();
        target.warmup(source).unwrap();
        assert_eq!(table_value(&target, "w"), 5.0);
        assert_eq!(target.num_rows("emb"), Some(2));
        assert!(!target.contains("extra"));
    }

    #[test]
    fn test_split_pull_request() {
        let table = ParameterTable::new(Shard::non_shard());
        let mut request = PullRequest::new(true);
        request.add_dense("w");
        request.add_sparse("emb", 0..9);
        request.add_freq(4, 2);

        let parts = table.split_pull_request(&request, 3);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.is_train));
        for (i, part) in parts.iter().enumerate() {
            let ids = &part.sparse_ids["emb"];
            assert_eq!(ids.len(), 3);
            assert!(ids.iter().all(|id| *id as usize % 3 == i));
        }
        assert_eq!(parts[1].id_freq.get(&4), Some(&2));
        assert!(parts[0].id_freq.is_empty());

        let owner = table.shard().shard_of_dense("w", 3) as usize;
        assert!(parts[owner].dense_names.contains("w"));
        assert_eq!(parts.iter().filter(|p| p.dense_names.contains("w")).count(), 1);
    }

    #[test]
    fn test_split_param_views() {
        let table = ParameterTable::new(Shard::non_shard());
        let mut param = TensorMap::new();
        param.insert("w", DenseTensor::from_vec(Shape::vector(2), vec![1.0, 2.0]).unwrap());
        param.insert("emb", sparse(2, &[(0, &[0.0, 0.5]), (1, &[1.0, 1.5]), (4, &[4.0, 4.5])]));

        let parts = table.split_param(&param, 2).unwrap();
        assert!(parts.iter().all(|p| p.contains("emb")));
        let even = parts[0].sparse("emb").unwrap();
        assert_eq!(even.len(), 2);
        assert_eq!(
            even.find_row(4).unwrap().as_ptr(),
            param.sparse("emb").unwrap().find_row(4).unwrap().as_ptr()
        );
        assert_eq!(parts[1].sparse("emb").unwrap().len(), 1);
        assert_eq!(parts.iter().filter(|p| p.contains("w")).count(), 1);
    }

    #[test]
    fn test_split_grad_routes_dense_rows_to_owner() {
        let table = ParameterTable::new(Shard::non_shard());
        let mut param = TensorMap::new();
        param.insert("w", DenseTensor::zeros(Shape::matrix(4, 2)).unwrap());
        param.insert("emb", SparseRowStore::new(2));

        let mut grad = TensorMap::new();
        grad.insert("w", sparse(2, &[(1, &[0.1, 0.1]), (2, &[0.2, 0.2])]));
        grad.insert("emb", sparse(2, &[(2, &[0.3, 0.3])]));

        let parts = table.split_grad(&param, &grad, 2).unwrap();
        let owner = table.shard().shard_of_dense("w", 2) as usize;
        assert_eq!(parts[owner].sparse("w").unwrap().len(), 2);
        assert!(!parts[1 - owner].contains("w"));
        assert!(parts[0].contains("emb"));
        assert!(!parts[1].contains("emb"));
    }

    #[test]
    fn test_write_read() {
        let mut table = table();
        if let Some(TensorEntry::Sparse(store)) = table.get_mut("emb") {
            store.assign(9, &[9.0; 4]).unwrap();
        }
        let bytes = table.write();
        assert_eq!(&bytes[..4], &0i32.to_ne_bytes());

        let mut back = ParameterTable::new(Shard::non_shard());
        back.read(&bytes).unwrap();
        assert_eq!(back.into_tensor_map(), table.into_tensor_map());

        let mut bumped = bytes.clone();
        bumped[..4].copy_from_slice(&1i32.to_ne_bytes());
        let mut other = ParameterTable::new(Shard::non_shard());
        assert!(matches!(
            other.read(&bumped),
            Err(PsError::UnsupportedVersion { version: 1 })
        ));
        assert!(other.is_empty());
    }

    #[test]
    fn test_lookup_rows() {
        let mut table = table();
        if let Some(TensorEntry::Sparse(store)) = table.get_mut("emb") {
            store.assign(1, &[1.0; 4]).unwrap();
        }
        let request = RowLookupRequest {
            keys: vec![
                ("emb".to_string(), 1),
                ("emb".to_string(), 2),
                ("w".to_string(), 1),
            ],
        };
        let rows = table.lookup_rows(&request);
        assert_eq!(rows[0].values.as_deref(), Some(&[1.0; 4][..]));
        assert!(rows[1].is_absent());
        assert!(rows[2].is_absent());
        assert_eq!(table.num_rows("emb"), Some(1));
    }

    #[test]
    fn test_remove_zeros_sparse() {
        let mut table = table();
        if let Some(TensorEntry::Sparse(store)) = table.get_mut("emb") {
            store.assign(1, &[0.0; 4]).unwrap();
            store.assign(2, &[0.0, 0.0, 1.0, 0.0]).unwrap();
        }
        assert_eq!(table.remove_zeros_sparse(), 1);

        let mut seen = Vec::new();
        table.for_each_sparse(|name, store| seen.push((name.to_string(), store.len())));
        assert_eq!(seen, vec![("emb".to_string(), 1)]);
    }
}
