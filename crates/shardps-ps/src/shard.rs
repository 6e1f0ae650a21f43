//! Ownership of dense tensors and sparse rows across servers.
//!
//! A [`ShardPolicy`] maps a dense tensor name or a sparse row id to the index
//! of the server that owns it. A [`Shard`] binds a policy to one server's
//! position `(shard_id, shard_size)` and answers "is this mine?".
//!
//! Policies are looked up by name in a [`ShardRegistry`], so a persisted
//! layout can name the function it was built with. Two are built in:
//!
//! - `default` - dense by the low 32 bits of the name's MurmurHash64A, sparse
//!   by the low 32 bits of the row id
//! - `modulo` - every dense tensor on shard 0, sparse by bits 24..48 of the
//!   row id
//!
//! # Example
//!
//! ```
//! use shardps_ps::{Shard, ShardRegistry};
//!
//! let registry = ShardRegistry::default();
//! let shard = Shard::new(1, 4, "default", &registry).unwrap();
//! assert!(shard.has_sparse_row("emb", 5));
//! assert!(!shard.has_sparse_row("emb", 6));
//! ```

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use shardps_core::codec::{Encode, Reader, Writer};
use shardps_core::hash::hash_name;
use shardps_core::{CoreError, RowId};

use crate::error::{PsError, Result};

/// Leading word of a persisted shard layout.
pub const SHARD_MAGIC: i32 = 0x203d_e81b;

/// Name of the built-in hash policy.
pub const DEFAULT_SHARD_FUNC: &str = "default";

/// Name of the built-in legacy policy.
pub const MODULO_SHARD_FUNC: &str = "modulo";

/// Maps tensors and rows to shard indices.
pub trait ShardPolicy: Send + Sync + fmt::Debug {
    /// Returns the shard in `0..shard_size` that owns dense tensor `name`.
    fn shard_of_dense(&self, name: &str, shard_size: u32) -> u32;

    /// Returns the shard in `0..shard_size` that owns row `id` of sparse
    /// tensor `name`.
    fn shard_of_sparse(&self, name: &str, id: RowId, shard_size: u32) -> u32;
}

/// The `default` policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultShardPolicy;

impl ShardPolicy for DefaultShardPolicy {
    fn shard_of_dense(&self, name: &str, shard_size: u32) -> u32 {
        (hash_name(name) as u32) % shard_size
    }

    fn shard_of_sparse(&self, _name: &str, id: RowId, shard_size: u32) -> u32 {
        (id as u32) % shard_size
    }
}

/// The `modulo` policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloShardPolicy;

impl ShardPolicy for ModuloShardPolicy {
    fn shard_of_dense(&self, _name: &str, _shard_size: u32) -> u32 {
        0
    }

    fn shard_of_sparse(&self, _name: &str, id: RowId, shard_size: u32) -> u32 {
        (((id & 0x0000_ffff_ff00_0000) >> 24) as u32) % shard_size
    }
}

/// Shard policies by name.
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    policies: HashMap<String, Arc<dyn ShardPolicy>>,
}

impl Default for ShardRegistry {
    /// Creates a registry holding the `default` and `modulo` policies.
    fn default() -> Self {
        let mut policies: HashMap<String, Arc<dyn ShardPolicy>> = HashMap::new();
        policies.insert(DEFAULT_SHARD_FUNC.to_string(), Arc::new(DefaultShardPolicy));
        policies.insert(MODULO_SHARD_FUNC.to_string(), Arc::new(ModuloShardPolicy));
        Self { policies }
    }
}

impl ShardRegistry {
    /// Creates a registry with no policies.
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Registers `policy` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ShardFunc`] if `name` is already registered.
    pub fn register(&mut self, name: impl Into<String>, policy: Arc<dyn ShardPolicy>) -> Result<()> {
        let name = name.into();
        if self.policies.contains_key(&name) {
            return Err(PsError::ShardFunc {
                name,
                message: "already registered".to_string(),
            });
        }
        tracing::debug!(name = %name, "Registered shard function");
        self.policies.insert(name, policy);
        Ok(())
    }

    /// Returns the policy registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ShardFunc`] if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ShardPolicy>> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| PsError::ShardFunc {
                name: name.to_string(),
                message: "not registered".to_string(),
            })
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }
}

/// Whether a table holds everything or one shard's part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardMode {
    /// One table holds every tensor and row.
    NonShard = 0,
    /// Tensors and rows are split across `shard_size` tables.
    Shard = 1,
}

/// One server's position in a sharded layout.
#[derive(Debug, Clone)]
pub struct Shard {
    mode: ShardMode,
    shard_id: u32,
    shard_size: u32,
    func_name: String,
    policy: Arc<dyn ShardPolicy>,
}

impl Default for Shard {
    fn default() -> Self {
        Self::non_shard()
    }
}

impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.shard_id == other.shard_id
            && self.shard_size == other.shard_size
            && self.func_name == other.func_name
    }
}

impl Shard {
    /// Creates the non-shard layout: one table owning everything.
    pub fn non_shard() -> Self {
        Self {
            mode: ShardMode::NonShard,
            shard_id: 0,
            shard_size: 1,
            func_name: DEFAULT_SHARD_FUNC.to_string(),
            policy: Arc::new(DefaultShardPolicy),
        }
    }

    /// Creates shard `shard_id` of `shard_size` using the policy registered
    /// as `func_name`.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ConfigValidation`] if `shard_size` is zero or
    /// `shard_id` is not below it, and [`PsError::ShardFunc`] if `func_name`
    /// is not registered.
    pub fn new(shard_id: u32, shard_size: u32, func_name: &str, registry: &ShardRegistry) -> Result<Self> {
        let policy = registry.get(func_name)?;
        Self::with_policy(shard_id, shard_size, func_name, policy)
    }

    /// Like [`new`](Self::new) with an explicit policy.
    pub fn with_policy(
        shard_id: u32,
        shard_size: u32,
        func_name: impl Into<String>,
        policy: Arc<dyn ShardPolicy>,
    ) -> Result<Self> {
        if shard_size == 0 || i32::try_from(shard_size).is_err() {
            return Err(PsError::config(format!(
                "shard_size ({}) must be in 1..={}",
                shard_size,
                i32::MAX
            )));
        }
        if shard_id >= shard_size {
            return Err(PsError::config(format!(
                "shard_id ({}) must be below shard_size ({})",
                shard_id, shard_size
            )));
        }
        Ok(Self {
            mode: ShardMode::Shard,
            shard_id,
            shard_size,
            func_name: func_name.into(),
            policy,
        })
    }

    /// Returns the shard mode.
    pub fn mode(&self) -> ShardMode {
        self.mode
    }

    /// Returns `true` in [`ShardMode::Shard`].
    pub fn is_shard(&self) -> bool {
        self.mode == ShardMode::Shard
    }

    /// Returns this server's index.
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Returns the number of servers.
    pub fn shard_size(&self) -> u32 {
        self.shard_size
    }

    /// Returns the registered name of the policy.
    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    /// Returns the policy.
    pub fn policy(&self) -> &dyn ShardPolicy {
        self.policy.as_ref()
    }

    /// Returns `true` if dense tensor `name` belongs to this shard.
    pub fn has_dense_tensor(&self, name: &str) -> bool {
        !self.is_shard() || self.policy.shard_of_dense(name, self.shard_size) == self.shard_id
    }

    /// Returns `true` if row `id` of sparse tensor `name` belongs to this shard.
    pub fn has_sparse_row(&self, name: &str, id: RowId) -> bool {
        !self.is_shard() || self.policy.shard_of_sparse(name, id, self.shard_size) == self.shard_id
    }

    /// Returns the owner of dense tensor `name` among `shard_size` servers.
    pub fn shard_of_dense(&self, name: &str, shard_size: u32) -> u32 {
        self.policy.shard_of_dense(name, shard_size)
    }

    /// Returns the owner of sparse row `id` among `shard_size` servers.
    pub fn shard_of_sparse(&self, name: &str, id: RowId, shard_size: u32) -> u32 {
        self.policy.shard_of_sparse(name, id, shard_size)
    }

    /// Decodes a persisted layout for server `shard_id`.
    ///
    /// Accepts both the current layout and the legacy one, a bare `i32`
    /// shard size where `0` means non-shard and anything else means shard
    /// mode with the `default` policy.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::Core`] for malformed bytes, and the errors of
    /// [`new`](Self::new) for an inconsistent layout.
    pub fn decode_layout(bytes: &[u8], shard_id: u32, registry: &ShardRegistry) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let first = r.read_i32()?;
        if first != SHARD_MAGIC {
            r.finish()?;
            return match first {
                0 => Ok(Self::non_shard()),
                size if size > 0 => Self::new(shard_id, size as u32, DEFAULT_SHARD_FUNC, registry),
                size => Err(CoreError::invalid(format!("legacy shard size {}", size)).into()),
            };
        }

        let mode = r.read_i32()?;
        let size = r.read_i32()?;
        let func_name = r.get::<String>()?;
        r.finish()?;
        match mode {
            0 => Ok(Self::non_shard()),
            1 => {
                let size = u32::try_from(size)
                    .map_err(|_| CoreError::invalid(format!("shard size {}", size)))?;
                Self::new(shard_id, size, &func_name, registry)
            }
            other => Err(CoreError::UnknownTag {
                kind: "shard mode",
                tag: i64::from(other),
            }
            .into()),
        }
    }
}

// Layout: i32 magic, i32 mode, i32 shard_size, string func_name. The shard
// id is not persisted; each server supplies its own.
impl Encode for Shard {
    fn encode(&self, w: &mut Writer) {
        w.put_i32(SHARD_MAGIC);
        w.put_i32(self.mode as i32);
        // with_policy keeps shard_size within i32.
        w.put_i32(i32::try_from(self.shard_size).unwrap_or(i32::MAX));
        w.put(self.func_name.as_str());
    }
}
