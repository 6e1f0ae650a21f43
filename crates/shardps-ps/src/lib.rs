//! Parameter tables and the blocking TCP protocol that keeps them in sync.
//!
//! A parameter server holds a [`ParameterTable`]: named dense tensors and
//! sparse row stores, partitioned across servers by a [`Shard`] layout.
//! Workers talk to servers with length-prefixed [`DistMessage`] frames over
//! [`TcpConnection`]s:
//!
//! - **Pull**: a [`PullRequest`] names dense tensors and sparse rows; the
//!   server answers with an encoded [`TensorMap`] of views into its table.
//! - **Push**: a worker sends a [`TensorMap`] of deltas, which the server
//!   adds into its table.
//! - **Checkpoint**: [`checkpoint::save`] and [`checkpoint::load`] persist a
//!   table together with its shard layout.
//!
//! ```text
//!  worker                          server (shard k of n)
//!  ──────                          ─────────────────────
//!  split_pull_request ──PULL────▶  ParameterTable::pull
//!                     ◀─RESPONSE─  encode(TensorMap)
//!  split_grad         ──PUSH────▶  ParameterTable::update
//! ```
//!
//! # Example
//!
//! ```
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
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
//!             ParamDecl::sparse("emb", 100, 8, InitializerConfig::ones()).unwrap(),
//!         ],
//!     )
//!     .unwrap();
//!
//! let mut request = PullRequest::new(true);
//! request.add_dense("bias");
//! request.add_sparse("emb", [1, 2, 3]);
//!
//! let pulled = table.pull(&mut rng, &request).unwrap();
//! assert_eq!(pulled.sparse("emb").unwrap().len(), 3);
//! ```

mod error;

pub mod checkpoint;
pub mod config;
pub mod connection;
pub mod message;
pub mod pull;
pub mod server;
pub mod shard;
pub mod table;
pub mod tensor_map;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{ReadStatus, TcpConnection, TcpConnections};
pub use error::{PsError, Result};
pub use message::{DistMessage, MessageType};
pub use pull::{PullRequest, RowEntry, RowLookupRequest, ABSENT_ROW};
pub use server::{ParamServer, RowLookupHandler, ServerHandle, UserHandler};
pub use shard::{DefaultShardPolicy, ModuloShardPolicy, Shard, ShardMode, ShardPolicy, ShardRegistry};
pub use table::{ParamDecl, ParamKind, ParameterTable};
pub use tensor_map::{TensorEntry, TensorMap, TensorType};
