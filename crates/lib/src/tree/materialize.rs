use std::io;
use std::path::{Path, PathBuf};

use prost::Message;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::blobstore::{BlobStore, IntegrityError, StoreError, read_blob};
use crate::consts::{INPUT_DIRECTORY_MODE, INPUT_EXECUTABLE_MODE, INPUT_FILE_MODE};
use crate::digest::Digest;
use crate::platform::permissions::{PermissionError, set_mode};
use crate::proto;
use crate::tree::{UnsafePath, validate_name};

#[derive(Debug, Error)]
pub enum MaterializeError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to decode directory {digest}: {source}")]
  Decode {
    digest: Digest,
    #[source]
    source: prost::DecodeError,
  },

  #[error("{kind} {name:?} has no digest")]
  MissingDigest { kind: &'static str, name: String },

  #[error(transparent)]
  UnsafePath(#[from] UnsafePath),

  #[error("{path} resolves outside the materialization root")]
  Escape { path: PathBuf },

  #[error("filesystem error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Permissions(#[from] PermissionError),
}

impl MaterializeError {
  /// Whether the tree itself is malformed, as opposed to unreadable.
  pub fn is_malformed(&self) -> bool {
    matches!(
      self,
      MaterializeError::Decode { .. }
        | MaterializeError::MissingDigest { .. }
        | MaterializeError::UnsafePath(_)
        | MaterializeError::Escape { .. }
    )
  }

  fn io(path: &Path) -> impl FnOnce(io::Error) -> MaterializeError + '_ {
    move |source| MaterializeError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
  pub files: usize,
  pub directories: usize,
  pub bytes: u64,
}

/// Reconstruct the tree rooted at `root` into the existing directory `target`.
///
/// Files are written `0444` (`0555` if executable) and directories end up
/// `0555`, `target` included. Any error aborts immediately; whatever was
/// already written is left for the caller to discard.
pub async fn materialize_tree<S: BlobStore + ?Sized>(
  store: &S,
  instance: &str,
  root: &proto::Digest,
  target: &Path,
) -> Result<MaterializeStats, MaterializeError> {
  let target = dunce::canonicalize(target).map_err(MaterializeError::io(target))?;
  let mut stats = MaterializeStats::default();

  // Directories stay owner-writable until every entry is in place.
  let mut created = vec![target.clone()];
  let mut pending = vec![(Digest::from_wire(instance, root), target.clone())];

  while let Some((digest, dir)) = pending.pop() {
    let directory = fetch_directory(store, &digest).await?;
    debug!(digest = %digest, path = ?dir, "materializing directory");

    for file in &directory.files {
      validate_name(&file.name)?;
      let wire = file.digest.as_ref().ok_or_else(|| MaterializeError::MissingDigest {
        kind: "file",
        name: file.name.clone(),
      })?;
      ensure_contained(&dir, &target)?;

      let path = dir.join(&file.name);
      stats.bytes += write_file(store, &Digest::from_wire(instance, wire), &path, file.is_executable).await?;
      stats.files += 1;
    }

    for subdir in &directory.directories {
      validate_name(&subdir.name)?;
      let wire = subdir.digest.as_ref().ok_or_else(|| MaterializeError::MissingDigest {
        kind: "directory",
        name: subdir.name.clone(),
      })?;
      ensure_contained(&dir, &target)?;

      let path = dir.join(&subdir.name);
      create_dir_exclusive(&path).await?;
      created.push(path.clone());
      pending.push((Digest::from_wire(instance, wire), path));
      stats.directories += 1;
    }
  }

  for dir in created.iter().rev() {
    set_mode(dir, INPUT_DIRECTORY_MODE)?;
  }

  info!(
    root = %Digest::from_wire(instance, root),
    files = stats.files,
    directories = stats.directories,
    bytes = stats.bytes,
    "materialized input tree"
  );
  Ok(stats)
}

async fn fetch_directory<S: BlobStore + ?Sized>(
  store: &S,
  digest: &Digest,
) -> Result<proto::Directory, MaterializeError> {
  let bytes = read_blob(store, digest).await?;
  proto::Directory::decode(bytes.as_slice()).map_err(|source| MaterializeError::Decode {
    digest: digest.clone(),
    source,
  })
}

/// `parent` must canonicalize to itself and sit inside `root`.
fn ensure_contained(parent: &Path, root: &Path) -> Result<(), MaterializeError> {
  let canonical = dunce::canonicalize(parent).map_err(MaterializeError::io(parent))?;
  if canonical != parent || !canonical.starts_with(root) {
    return Err(MaterializeError::Escape {
      path: parent.to_path_buf(),
    });
  }
  Ok(())
}

async fn create_dir_exclusive(path: &Path) -> Result<(), MaterializeError> {
  tokio::fs::DirBuilder::new()
    .mode(0o700)
    .create(path)
    .await
    .map_err(MaterializeError::io(path))
}

async fn write_file<S: BlobStore + ?Sized>(
  store: &S,
  digest: &Digest,
  path: &Path,
  executable: bool,
) -> Result<u64, MaterializeError> {
  let mut reader = store.get(digest).await?;
  let mut file = tokio::fs::OpenOptions::new()
    .write(true)
    .create_new(true)
    .mode(0o600)
    .open(path)
    .await
    .map_err(MaterializeError::io(path))?;

  let written = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
    if IntegrityError::from_io(&e).is_some() {
      MaterializeError::Store(e.into())
    } else {
      MaterializeError::Io {
        path: path.to_path_buf(),
        source: e,
      }
    }
  })?;
  file.flush().await.map_err(MaterializeError::io(path))?;
  drop(file);

  let mode = if executable { INPUT_EXECUTABLE_MODE } else { INPUT_FILE_MODE };
  set_mode(path, mode)?;
  Ok(written)
}
