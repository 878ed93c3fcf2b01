//! Types shared across local action execution.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::blobstore::StoreError;
use crate::consts::{DEFAULT_SANDBOX_GID, DEFAULT_SANDBOX_UID};
use crate::platform::permissions::PermissionError;
use crate::tree::{MaterializeError, UnsafePath};
use crate::workspace::WorkspaceError;

/// A declared output file the command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct OutputFile {
  /// Path relative to the build root, exactly as declared.
  pub path: String,
  pub content: Vec<u8>,
  pub is_executable: bool,
}

/// Outcome of a command that ran to completion.
///
/// A non-zero exit code is a successful execution; only failures to run the
/// command at all surface as [`ExecuteError`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ActionResult {
  /// Exit status, or `128 + signal` if the command was killed by a signal.
  pub exit_code: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
  /// Declared outputs that exist, in declaration order.
  pub output_files: Vec<OutputFile>,
}

impl ActionResult {
  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  pub fn output_file(&self, path: &str) -> Option<&OutputFile> {
    self.output_files.iter().find(|f| f.path == path)
  }
}

/// User and group a command runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
  pub uid: u32,
  pub gid: u32,
}

impl Credentials {
  pub fn new(uid: u32, gid: u32) -> Self {
    Self { uid, gid }
  }

  /// The unprivileged default when the worker itself runs as root.
  pub fn default_for_worker() -> Option<Self> {
    rustix::process::geteuid()
      .is_root()
      .then(|| Self::new(DEFAULT_SANDBOX_UID, DEFAULT_SANDBOX_GID))
  }
}

impl fmt::Display for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.uid, self.gid)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid credentials {0:?}: expected <uid>:<gid>")]
pub struct ParseCredentialsError(String);

impl FromStr for Credentials {
  type Err = ParseCredentialsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ParseCredentialsError(s.to_string());
    let (uid, gid) = s.split_once(':').ok_or_else(invalid)?;
    Ok(Self {
      uid: uid.parse().map_err(|_| invalid())?,
      gid: gid.parse().map_err(|_| invalid())?,
    })
  }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Credentials to drop to before running the command; `None` keeps the worker's own.
  pub run_as: Option<Credentials>,
  /// Wall-clock limit on the command itself.
  pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      run_as: Credentials::default_for_worker(),
      timeout: None,
    }
  }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("failed to materialize input root: {0}")]
  Materialize(#[from] MaterializeError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("workspace error: {0}")]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Permissions(#[from] PermissionError),

  #[error("unsupported feature: {0}")]
  UnsupportedFeature(String),

  #[error("malformed action: {0}")]
  MalformedAction(String),

  #[error("failed to execute {program}: {source}")]
  ExecutionFailure {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("command timed out after {timeout:?}")]
  Timeout { timeout: Duration },

  #[error("execution was cancelled")]
  Cancelled,

  #[error("filesystem error at {path}: {source}")]
  Filesystem {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl From<UnsafePath> for ExecuteError {
  fn from(err: UnsafePath) -> Self {
    ExecuteError::MalformedAction(err.to_string())
  }
}

impl ExecuteError {
  /// Whether the request itself is at fault, as opposed to the worker or store.
  pub fn is_caller_fault(&self) -> bool {
    match self {
      ExecuteError::MalformedAction(_) | ExecuteError::UnsupportedFeature(_) => true,
      ExecuteError::Materialize(e) => e.is_malformed(),
      ExecuteError::Store(e) => e.is_caller_fault(),
      _ => false,
    }
  }
}
