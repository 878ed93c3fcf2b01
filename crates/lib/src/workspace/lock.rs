//! Exclusive ownership of a build workspace across processes.
//!
//! The lock is an `flock` on `<base>/.lock`. The file's contents describe the
//! holder so that a second worker can say who it is waiting on.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const LOCK_FILENAME: &str = ".lock";
const METADATA_VERSION: u32 = 1;

/// Who holds a workspace, as recorded in its lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub workspace: PathBuf,
}

impl LockMetadata {
  fn for_current_process(command: &str, workspace: &Path) -> Self {
    Self {
      version: METADATA_VERSION,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
      command: command.to_string(),
      workspace: workspace.to_path_buf(),
    }
  }

  fn parse(contents: &str) -> Option<Self> {
    serde_json::from_str(contents).ok()
  }
}

#[derive(Debug, Error)]
pub enum WorkspaceLockError {
  #[error(
    "workspace is in use by `{}` (pid {}, started at unix time {})\n\
     If no other buildbox process is running, remove {lock_path}",
    .holder.command, .holder.pid, .holder.started_at_unix
  )]
  Contention { holder: LockMetadata, lock_path: PathBuf },

  #[error("workspace is in use by an unknown process\nIf no other buildbox process is running, remove {lock_path}")]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to {action} {path}: {source}")]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Held for as long as a workspace is in use; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
  file: File,
  lock_path: PathBuf,
}

impl WorkspaceLock {
  /// Take the exclusive lock on the workspace rooted at `base` without blocking.
  pub fn acquire(base: &Path, command: &str) -> Result<Self, WorkspaceLockError> {
    let lock_path = base.join(LOCK_FILENAME);
    let io_err = |action, path: &Path| {
      let path = path.to_path_buf();
      move |source| WorkspaceLockError::Io { action, path, source }
    };

    std::fs::create_dir_all(base).map_err(io_err("create", base))?;
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_err("open", &lock_path))?;

    match flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive) {
      Ok(()) => {}
      Err(Errno::WOULDBLOCK) => return Err(contention(&lock_path)),
      Err(errno) => return Err(io_err("lock", &lock_path)(errno.into())),
    }

    let metadata = LockMetadata::for_current_process(command, base);
    write_metadata(&mut file, &metadata).map_err(io_err("write", &lock_path))?;
    debug!(lock = ?lock_path, command, "acquired workspace lock");
    Ok(Self { file, lock_path })
  }

  /// Read back the metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    serde_json::from_reader(file).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &mut File, metadata: &LockMetadata) -> io::Result<()> {
  file.set_len(0)?;
  file.seek(SeekFrom::Start(0))?;
  serde_json::to_writer_pretty(&mut *file, metadata).map_err(io::Error::other)?;
  file.flush()
}

fn contention(lock_path: &Path) -> WorkspaceLockError {
  let lock_path = lock_path.to_path_buf();
  match std::fs::read_to_string(&lock_path).ok().as_deref().and_then(LockMetadata::parse) {
    Some(holder) => WorkspaceLockError::Contention { holder, lock_path },
    None => {
      warn!(lock = ?lock_path, "workspace locked but holder metadata is unreadable");
      WorkspaceLockError::ContentionUnknown { lock_path }
    }
  }
}
