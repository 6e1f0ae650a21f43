//! Connection and server configuration.
//!
//! Both configs deserialize with serde, fill unspecified fields from
//! [`Default`], and are checked with `validate()` before use.
//!
//! # Example
//!
//! ```
//! use shardps_ps::config::{parse_endpoints, ServerConfig};
//!
//! let config = ServerConfig::builder()
//!     .listen("127.0.0.1:0".parse().unwrap())
//!     .shard(1, 2)
//!     .lock_mode(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.shard_id, 1);
//!
//! let peers = parse_endpoints("10.0.0.1:9000;10.0.0.2:9000").unwrap();
//! assert_eq!(peers.len(), 2);
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PsError, Result};
use crate::shard::DEFAULT_SHARD_FUNC;

/// Initial size of a connection's receive buffer.
pub const INITIAL_BUF_BYTES: usize = 100 * 1024;

/// An idle receive buffer larger than this shrinks back to
/// [`INITIAL_BUF_BYTES`].
pub const MAX_IDLE_BUF_BYTES: usize = 10 * 1024 * 1024;

/// Settings for one TCP connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connect attempts made by `connect_retry`.
    pub retries: u32,
    /// Pause between two connect attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Socket read timeout in milliseconds. `None` blocks forever.
    pub read_timeout_ms: Option<u64>,
    /// Socket write timeout in milliseconds. `None` blocks forever.
    pub write_timeout_ms: Option<u64>,
    /// Whether to set `TCP_NODELAY`.
    pub nodelay: bool,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_backoff_ms: 1000,
            read_timeout_ms: None,
            write_timeout_ms: None,
            nodelay: true,
            max_frame_size: 4 << 30,
        }
    }
}

impl ConnectionConfig {
    /// Returns the pause between connect attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Returns the socket read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the socket write timeout.
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// Sets the connect attempts and the pause between them.
    pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ConfigValidation`] for zero retries, a zero timeout
    /// (the OS rejects it) or a frame limit too small to hold a message type.
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(PsError::config("retries must be at least 1"));
        }
        if self.read_timeout_ms == Some(0) || self.write_timeout_ms == Some(0) {
            return Err(PsError::config("socket timeouts must be positive when set"));
        }
        if self.max_frame_size < std::mem::size_of::<i32>() as u64 {
            return Err(PsError::config(format!(
                "max_frame_size ({}) cannot hold a message type",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

/// Settings for a parameter server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept workers on.
    pub listen: SocketAddr,
    /// This server's index.
    pub shard_id: u32,
    /// Number of servers.
    pub shard_size: u32,
    /// Registered name of the shard policy.
    pub shard_func: String,
    /// Serve sessions on their own threads through the per-tensor locks.
    pub lock_mode: bool,
    /// Directory for checkpoints. `None` disables model saving.
    pub model_dir: Option<PathBuf>,
    /// Settings applied to accepted connections.
    pub connection: ConnectionConfig,
    /// Seed for the engines that initialize rows created by pulls. Session
    /// `n` (in accept order) uses `seed + n`. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 61000)),
            shard_id: 0,
            shard_size: 1,
            shard_func: DEFAULT_SHARD_FUNC.to_string(),
            lock_mode: false,
            model_dir: None,
            connection: ConnectionConfig::default(),
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Returns a builder starting from the defaults.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ConfigValidation`] for an empty layout, a shard id
    /// out of range, an empty shard function name, or an invalid
    /// connection config.
    pub fn validate(&self) -> Result<()> {
        if self.shard_size == 0 || i32::try_from(self.shard_size).is_err() {
            return Err(PsError::config(format!(
                "shard_size ({}) must be in 1..={}",
                self.shard_size,
                i32::MAX
            )));
        }
        if self.shard_id >= self.shard_size {
            return Err(PsError::config(format!(
                "shard_id ({}) must be below shard_size ({})",
                self.shard_id, self.shard_size
            )));
        }
        if self.shard_func.is_empty() {
            return Err(PsError::config("shard_func must not be empty"));
        }
        self.connection.validate()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Sets the listen address.
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.listen = addr;
        self
    }

    /// Sets this server's index and the number of servers.
    pub fn shard(mut self, shard_id: u32, shard_size: u32) -> Self {
        self.config.shard_id = shard_id;
        self.config.shard_size = shard_size;
        self
    }

    /// Sets the shard policy name.
    pub fn shard_func(mut self, name: impl Into<String>) -> Self {
        self.config.shard_func = name.into();
        self
    }

    /// Enables or disables lock mode.
    pub fn lock_mode(mut self, enabled: bool) -> Self {
        self.config.lock_mode = enabled;
        self
    }

    /// Sets the checkpoint directory.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = Some(dir.into());
        self
    }

    /// Sets the connection settings.
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Sets the row initialization seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parses one `ip:port` endpoint.
///
/// The port is whatever follows the last `:`, so bracketed IPv6 addresses
/// such as `[::1]:9000` also parse.
///
/// # Errors
///
/// Returns [`PsError::ConfigValidation`] if the address does not parse or the
/// port is outside `1..=65535`.
pub fn parse_endpoint(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    let (ip, port) = s
        .rsplit_once(':')
        .ok_or_else(|| PsError::config(format!("endpoint {:?} has no port", s)))?;
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| PsError::config(format!("endpoint {:?} has an invalid ip", s)))?;
    let port: u16 = port
        .parse()
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| PsError::config(format!("endpoint {:?} has an invalid port", s)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Parses a `;`-separated endpoint list. Empty items are skipped.
///
/// # Errors
///
/// Returns the first [`parse_endpoint`] error, or
/// [`PsError::ConfigValidation`] if the list has no endpoints.
pub fn parse_endpoints(s: &str) -> Result<Vec<SocketAddr>> {
    let endpoints = s
        .split(';')
        .filter(|item| !item.trim().is_empty())
        .map(parse_endpoint)
        .collect::<Result<Vec<_>>>()?;
    if endpoints.is_empty() {
        return Err(PsError::config(format!("endpoint list {:?} is empty", s)));
    }
    Ok(endpoints)
}
