//! Saving and restoring parameter tables.
//!
//! A checkpoint directory holds:
//!
//! - `model.bin`, or `model.bin.{shard_id}` for a sharded table
//! - `shard.bin`, the encoded [`Shard`] layout
//! - `SUCCESS`, written last
//!
//! Each file is written to a temporary file in the same directory and
//! renamed into place, so a reader never sees a partial file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use shardps_core::codec::encode_to_vec;
use tempfile::NamedTempFile;

use crate::error::{PsError, Result};
use crate::shard::{Shard, ShardRegistry};
use crate::table::ParameterTable;

/// Name of the unsharded model file.
pub const MODEL_FILE: &str = "model.bin";

/// Name of the shard layout file.
pub const SHARD_FILE: &str = "shard.bin";

/// Name of the completion marker.
pub const SUCCESS_FILE: &str = "SUCCESS";

/// Returns the model file name for `shard`.
pub fn model_file_name(shard: &Shard) -> String {
    if shard.is_shard() {
        format!("{}.{}", MODEL_FILE, shard.shard_id())
    } else {
        MODEL_FILE.to_string()
    }
}

/// Returns `true` if `dir` holds a completed checkpoint.
pub fn is_complete(dir: &Path) -> bool {
    dir.join(SUCCESS_FILE).is_file()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PsError + '_ {
    move |source| PsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    file.write_all(bytes).map_err(io_error(path))?;
    file.as_file().sync_all().map_err(io_error(path))?;
    file.persist(path).map_err(|e| PsError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Writes `table` into `dir`, creating the directory if needed.
///
/// Returns the path of the model file.
pub fn save(table: &ParameterTable, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(model_file_name(table.shard()));
    tracing::info!(path = %path.display(), tensors = table.len(), "Saving parameter table");

    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let bytes = table.write();
    write_atomic(&path, &bytes)?;
    write_atomic(&dir.join(SHARD_FILE), &encode_to_vec(table.shard()))?;
    write_atomic(&dir.join(SUCCESS_FILE), b"")?;

    tracing::debug!(path = %path.display(), size = bytes.len(), "Parameter table saved");
    Ok(path)
}

/// Restores the table saved in `dir` for server `shard_id`.
///
/// # Errors
///
/// Returns [`PsError::CheckpointNotFound`] if `dir` has no `SUCCESS` marker,
/// [`PsError::Io`] if a file cannot be read, and the errors of
/// [`Shard::decode_layout`] and [`ParameterTable::read`].
pub fn load(dir: &Path, shard_id: u32, registry: &ShardRegistry) -> Result<ParameterTable> {
    tracing::info!(path = %dir.display(), shard_id, "Restoring parameter table");
    if !is_complete(dir) {
        return Err(PsError::CheckpointNotFound(dir.to_path_buf()));
    }

    let shard_path = dir.join(SHARD_FILE);
    let layout = fs::read(&shard_path).map_err(io_error(&shard_path))?;
    let shard = Shard::decode_layout(&layout, shard_id, registry)?;

    let path = dir.join(model_file_name(&shard));
    let bytes = fs::read(&path).map_err(io_error(&path))?;
    let mut table = ParameterTable::new(shard);
    table.read(&bytes)?;

    tracing::info!(path = %path.display(), tensors = table.len(), "Parameter table restored");
    Ok(table)
}
