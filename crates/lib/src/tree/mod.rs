//! Merkle directory trees.
//!
//! [`materialize_tree`] reconstructs a tree from the store onto disk and
//! [`upload_directory`] does the reverse. Both reject entry names that are not
//! a single plain path component.

mod materialize;
mod upload;

use std::path::PathBuf;

use thiserror::Error;

pub use materialize::{MaterializeError, MaterializeStats, materialize_tree};
pub use upload::{UploadError, upload_blob, upload_directory, upload_message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsafe path {path:?}: {reason}")]
pub struct UnsafePath {
  pub path: String,
  pub reason: &'static str,
}

/// Check that `name` is a single normal path component.
pub fn validate_name(name: &str) -> Result<(), UnsafePath> {
  let reason = match name {
    "" => "empty name",
    "." => "refers to the current directory",
    ".." => "refers to the parent directory",
    _ if name.contains('/') => "contains a path separator",
    _ if name.contains('\0') => "contains a NUL byte",
    _ => return Ok(()),
  };
  Err(UnsafePath {
    path: name.to_string(),
    reason,
  })
}

/// Check a `/`-separated relative path component by component.
pub fn validate_relative_path(path: &str) -> Result<PathBuf, UnsafePath> {
  if path.starts_with('/') {
    return Err(UnsafePath {
      path: path.to_string(),
      reason: "is absolute",
    });
  }

  let mut relative = PathBuf::new();
  for component in path.split('/') {
    validate_name(component).map_err(|e| UnsafePath {
      path: path.to_string(),
      reason: e.reason,
    })?;
    relative.push(component);
  }
  Ok(relative)
}
