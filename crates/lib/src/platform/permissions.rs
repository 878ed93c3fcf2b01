//! Permission bits on materialized trees.
//!
//! Input trees are sealed read-only as they are written, so tearing one down
//! first has to hand write access back to the owner. Symlinks are never
//! followed: a command may leave links pointing anywhere on the host.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
  #[error("failed to set permissions on {path}: {source}")]
  SetPermissions {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to read metadata for {path}: {source}")]
  Metadata {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to traverse directory {path}: {source}")]
  WalkDir {
    path: String,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to remove {path}: {source}")]
  Remove {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Set the permission bits of `path` to exactly `mode`.
pub fn set_mode(path: &Path, mode: u32) -> Result<(), PermissionError> {
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| PermissionError::SetPermissions {
    path: path.display().to_string(),
    source: e,
  })
}

/// Current permission bits of `path`, without following a final symlink.
pub fn mode_of(path: &Path) -> Result<u32, PermissionError> {
  let metadata = fs::symlink_metadata(path).map_err(|e| PermissionError::Metadata {
    path: path.display().to_string(),
    source: e,
  })?;
  Ok(metadata.permissions().mode() & 0o7777)
}

/// Add owner write permission to `path`, returning its previous mode.
pub fn grant_owner_write(path: &Path) -> Result<u32, PermissionError> {
  let previous = mode_of(path)?;
  if previous & 0o200 == 0 {
    set_mode(path, previous | 0o200)?;
  }
  Ok(previous)
}

/// Recursively restore owner write access below `path`.
///
/// Directories are processed before their contents so the walk can enter
/// them. Failures on individual entries are logged and skipped.
pub fn make_writable(path: &Path) -> Result<(), PermissionError> {
  debug!(path = ?path, "restoring write access");

  for entry in WalkDir::new(path) {
    let entry = entry.map_err(|e| PermissionError::WalkDir {
      path: path.display().to_string(),
      source: e,
    })?;

    if entry.file_type().is_symlink() {
      continue;
    }
    if let Err(e) = make_entry_writable(entry.path(), entry.file_type().is_dir()) {
      warn!(path = ?entry.path(), error = %e, "failed to restore write access, continuing");
    }
  }

  Ok(())
}

fn make_entry_writable(path: &Path, is_dir: bool) -> Result<(), PermissionError> {
  let current = mode_of(path)?;
  // Files: 0644, Executables/Dirs: 0755
  let new_mode = if is_dir || current & 0o111 != 0 { 0o755 } else { 0o644 };
  set_mode(path, new_mode)
}

/// Delete the tree at `path`, whatever its permissions. Absent paths are fine.
pub fn remove_tree(path: &Path) -> Result<(), PermissionError> {
  let metadata = match fs::symlink_metadata(path) {
    Ok(m) => m,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => {
      return Err(PermissionError::Metadata {
        path: path.display().to_string(),
        source: e,
      });
    }
  };

  let removed = if metadata.is_dir() {
    make_writable(path)?;
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  removed.map_err(|e| PermissionError::Remove {
    path: path.display().to_string(),
    source: e,
  })
}
