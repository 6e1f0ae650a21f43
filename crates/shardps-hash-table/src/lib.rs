//! Hash tables and sparse row storage for parameter servers.
//!
//! This crate provides the keyed storage behind sparse embedding parameters.
//!
//! # Overview
//!
//! The main components are:
//!
//! - [`OpenAddressHashMap`] - A linear-probing hash map with tombstones
//! - [`SparseRowStore`] - Fixed-width `f32` rows keyed by row id, created
//!   lazily from an initializer
//! - [`initializer`] - Initialization strategies for rows and dense tensors
//!
//! # Example
//!
//! ```
//! use rand::{rngs::StdRng, SeedableRng};
//! use shardps_core::InitializerConfig;
//! use shardps_hash_table::SparseRowStore;
//!
//! let mut rng = StdRng::seed_from_u64(11);
//! let mut table = SparseRowStore::with_initializer(8, InitializerConfig::normal(0.0, 0.01)).unwrap();
//!
//! // Training reads create rows on demand.
//! let row = table.get_row(&mut rng, 1001).to_vec();
//! assert_eq!(row.len(), 8);
//!
//! // Pushed rows overwrite.
//! let mut delta = SparseRowStore::new(8);
//! delta.assign(1001, &[0.5; 8]).unwrap();
//! table.upsert(&delta).unwrap();
//! assert_eq!(table.find_row(1001), Some(&[0.5; 8][..]));
//! ```

mod error;
pub mod initializer;
pub mod open_address;
mod sparse_row;

pub use error::{HashTableError, Result};
pub use initializer::{
    rand_init, ArangeInitializer, ConstantInitializer, FanMode, Initializer, InitializerFactory,
    OnesInitializer, RandomIntInitializer, RandomNormalInitializer, RandomUniformInitializer,
    VarianceDistribution, VarianceScalingInitializer, ZerosInitializer,
};
pub use open_address::{IdentityHash, MurmurMix, OpenAddressHashMap, SlotHasher};
pub use sparse_row::{RowMap, SparseRowStore, MAX_COLUMN_WIDTH, SPARSE_ROW_MAGIC};
