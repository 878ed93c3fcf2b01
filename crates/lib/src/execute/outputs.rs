//! Declared output files: preparing their parents and collecting them.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use rustix::fs::{self, Mode, OFlags};
use rustix::io::Errno;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::consts::{INPUT_DIRECTORY_MODE, OUTPUT_DIRECTORY_MODE};
use crate::execute::types::{ExecuteError, OutputFile};
use crate::platform::permissions::{grant_owner_write, set_mode};
use crate::tree::validate_relative_path;

/// Create the parent directory of every declared output and make it world-writable.
///
/// Directories missing from the input tree are created read-only like the
/// rest of it, except for the output's immediate parent.
pub(crate) fn prepare_output_parents(build_root: &Path, outputs: &[String]) -> Result<(), ExecuteError> {
  let mut parents = Vec::with_capacity(outputs.len());

  for output in outputs {
    let relative = validate_relative_path(output)?;
    let mut current = build_root.to_path_buf();
    if let Some(parent) = relative.parent() {
      for component in parent.components() {
        let next = current.join(component);
        ensure_directory(&current, &next, output)?;
        current = next;
      }
    }
    parents.push(current);
  }

  // Loosened only once every parent exists, so that a later output's
  // ancestors are never left world-writable.
  for parent in parents {
    set_mode(&parent, OUTPUT_DIRECTORY_MODE)?;
  }
  Ok(())
}

fn ensure_directory(parent: &Path, dir: &Path, output: &str) -> Result<(), ExecuteError> {
  match std::fs::symlink_metadata(dir) {
    Ok(metadata) if metadata.is_dir() => return Ok(()),
    Ok(_) => {
      return Err(ExecuteError::MalformedAction(format!(
        "output {output:?} is below {}, which is not a directory",
        dir.display()
      )));
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(source) => {
      return Err(ExecuteError::Filesystem {
        path: dir.to_path_buf(),
        source,
      });
    }
  }

  let previous = grant_owner_write(parent)?;
  let created = std::fs::DirBuilder::new().mode(0o755).create(dir);
  set_mode(parent, previous)?;
  created.map_err(|source| ExecuteError::Filesystem {
    path: dir.to_path_buf(),
    source,
  })?;

  debug!(path = ?dir, "created output directory");
  set_mode(dir, INPUT_DIRECTORY_MODE)?;
  Ok(())
}

/// Read back every declared output that exists.
///
/// Each path is resolved one component at a time from a handle on the build
/// root, never following a symlink, so the command cannot redirect the read
/// outside the tree. A missing output is skipped. Any other failure to open or
/// read one aborts, as does an output that is not a regular file.
pub(crate) async fn collect_output_files(build_root: &Path, outputs: &[String]) -> Result<Vec<OutputFile>, ExecuteError> {
  let root = fs::openat(fs::CWD, build_root, OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC, Mode::empty())
    .map_err(|e| filesystem(build_root, e.into()))?;
  let mut collected = Vec::new();

  for output in outputs {
    let relative = validate_relative_path(output)?;
    let path = build_root.join(&relative);

    let Some(fd) = open_beneath(&root, &relative).map_err(|e| filesystem(&path, e))? else {
      debug!(output = %output, "declared output not produced");
      continue;
    };
    let stat = fs::fstat(&fd).map_err(|e| filesystem(&path, e.into()))?;
    if fs::FileType::from_raw_mode(stat.st_mode as _) != fs::FileType::RegularFile {
      return Err(not_a_file(&path));
    }

    let mut file = tokio::fs::File::from_std(std::fs::File::from(fd));
    let mut content = Vec::with_capacity(stat.st_size as usize);
    file.read_to_end(&mut content).await.map_err(|e| filesystem(&path, e))?;

    collected.push(OutputFile {
      path: output.clone(),
      content,
      is_executable: stat.st_mode & 0o111 != 0,
    });
  }

  Ok(collected)
}

/// Open `relative` below `root` without following symlinks in any component.
///
/// `None` if some component does not exist. The final component is opened
/// non-blocking so that a FIFO cannot stall the worker.
fn open_beneath(root: &OwnedFd, relative: &Path) -> io::Result<Option<OwnedFd>> {
  let components: Vec<_> = relative.components().map(|c| c.as_os_str()).collect();
  let Some((last, parents)) = components.split_last() else {
    return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty output path"));
  };

  let mut dir: Option<OwnedFd> = None;
  for component in parents {
    let parent = dir.as_ref().map_or(root.as_fd(), |d| d.as_fd());
    let flags = OFlags::RDONLY | OFlags::DIRECTORY | OFlags::NOFOLLOW | OFlags::CLOEXEC;
    match fs::openat(parent, *component, flags, Mode::empty()) {
      Ok(fd) => dir = Some(fd),
      Err(Errno::NOENT) => return Ok(None),
      Err(e) => return Err(e.into()),
    }
  }

  let parent = dir.as_ref().map_or(root.as_fd(), |d| d.as_fd());
  let flags = OFlags::RDONLY | OFlags::NOFOLLOW | OFlags::NONBLOCK | OFlags::CLOEXEC;
  match fs::openat(parent, *last, flags, Mode::empty()) {
    Ok(fd) => Ok(Some(fd)),
    Err(Errno::NOENT) => Ok(None),
    Err(e) => Err(e.into()),
  }
}

fn filesystem(path: &Path, source: io::Error) -> ExecuteError {
  ExecuteError::Filesystem {
    path: path.to_path_buf(),
    source,
  }
}

fn not_a_file(path: &Path) -> ExecuteError {
  filesystem(path, io::Error::new(io::ErrorKind::InvalidInput, "output is not a regular file"))
}
