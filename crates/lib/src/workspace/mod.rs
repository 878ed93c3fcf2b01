//! The directories one local action runs in.
//!
//! A [`BuildWorkspace`] owns a base directory holding the action's build root
//! (its working directory and input tree) and a scratch temp directory. Both
//! are discarded and recreated for every action; concurrent actions need
//! distinct workspaces, which [`WorkspaceLock`] enforces across processes.

mod lock;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::TMP_DIRECTORY_MODE;
use crate::platform::paths::workspace_dir;
use crate::platform::permissions::{PermissionError, remove_tree, set_mode};

pub use lock::{LockMetadata, WorkspaceLock, WorkspaceLockError};

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("failed to create {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Permissions(#[from] PermissionError),
}

#[derive(Debug, Clone)]
pub struct BuildWorkspace {
  base: PathBuf,
  build_root: PathBuf,
  tmp_dir: PathBuf,
}

impl BuildWorkspace {
  pub fn new(base: impl Into<PathBuf>) -> Self {
    let base = base.into();
    Self {
      build_root: base.join("build"),
      tmp_dir: base.join("tmp"),
      base,
    }
  }

  /// The workspace at the configured default location.
  pub fn from_env() -> Self {
    Self::new(workspace_dir())
  }

  pub fn base(&self) -> &Path {
    &self.base
  }

  pub fn build_root(&self) -> &Path {
    &self.build_root
  }

  pub fn tmp_dir(&self) -> &Path {
    &self.tmp_dir
  }

  /// Take exclusive use of this workspace for `command`.
  pub fn lock(&self, command: &str) -> Result<WorkspaceLock, WorkspaceLockError> {
    WorkspaceLock::acquire(&self.base, command)
  }

  /// Discard whatever the previous action left in the build root and recreate it empty.
  pub fn reset_build_root(&self) -> Result<(), WorkspaceError> {
    recreate(&self.base, &self.build_root)
  }

  /// Discard and recreate the temp directory, world-writable.
  pub fn reset_tmp_dir(&self) -> Result<(), WorkspaceError> {
    recreate(&self.base, &self.tmp_dir)?;
    set_mode(&self.tmp_dir, TMP_DIRECTORY_MODE)?;
    Ok(())
  }

  /// Remove the build root and temp directory.
  pub fn clean(&self) -> Result<(), WorkspaceError> {
    remove_tree(&self.build_root)?;
    remove_tree(&self.tmp_dir)?;
    Ok(())
  }
}

fn recreate(base: &Path, dir: &Path) -> Result<(), WorkspaceError> {
  remove_tree(dir)?;
  let create = |path: &Path, result: io::Result<()>| {
    result.map_err(|source| WorkspaceError::Create {
      path: path.to_path_buf(),
      source,
    })
  };
  create(base, std::fs::create_dir_all(base))?;
  create(dir, std::fs::create_dir(dir))?;
  debug!(path = ?dir, "recreated workspace directory");
  Ok(())
}
