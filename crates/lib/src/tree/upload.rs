use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::blobstore::{BlobStore, StoreError, write_blob};
use crate::digest::{Digest, HashAlgorithm};
use crate::proto;

#[derive(Debug, Error)]
pub enum UploadError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to traverse {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("{path} is neither a regular file nor a directory")]
  UnsupportedFileType { path: PathBuf },

  #[error("{path} has a name that is not valid UTF-8")]
  NonUtf8Name { path: PathBuf },
}

/// Store `data` under its SHA-256 digest in `instance`.
pub async fn upload_blob<S: BlobStore + ?Sized>(store: &S, instance: &str, data: Vec<u8>) -> Result<Digest, StoreError> {
  let digest = Digest::of(instance, HashAlgorithm::Sha256, &data);
  write_blob(store, &digest, data).await?;
  Ok(digest)
}

/// Encode `message` and store it as a blob.
pub async fn upload_message<S, M>(store: &S, instance: &str, message: &M) -> Result<Digest, StoreError>
where
  S: BlobStore + ?Sized,
  M: prost::Message,
{
  upload_blob(store, instance, proto::encode(message)).await
}

/// Upload the directory at `root` as a Merkle tree and return its digest.
///
/// Entries are visited children-first in name order, so every directory's
/// message is complete (and sorted) by the time it is uploaded.
pub async fn upload_directory<S: BlobStore + ?Sized>(
  store: &S,
  instance: &str,
  root: &Path,
) -> Result<Digest, UploadError> {
  let entries = WalkDir::new(root)
    .contents_first(true)
    .sort_by_file_name()
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .map_err(|source| UploadError::Walk {
      path: root.to_path_buf(),
      source,
    })?;

  let mut pending: HashMap<PathBuf, proto::Directory> = HashMap::new();
  let mut files = 0usize;

  for entry in entries {
    let path = entry.path();
    let file_type = entry.file_type();

    if file_type.is_dir() {
      let directory = pending.remove(path).unwrap_or_default();
      let digest = upload_message(store, instance, &directory).await?;
      debug!(path = ?path, digest = %digest, "uploaded directory");

      if entry.depth() == 0 {
        info!(root = ?root, digest = %digest, files, "uploaded directory tree");
        return Ok(digest);
      }
      let node = proto::DirectoryNode {
        name: entry_name(&entry)?,
        digest: Some(digest.to_wire()),
      };
      pending.entry(parent_of(path)).or_default().directories.push(node);
    } else if file_type.is_file() {
      let data = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
      })?;
      let metadata = entry.metadata().map_err(|source| UploadError::Walk {
        path: path.to_path_buf(),
        source,
      })?;
      let digest = upload_blob(store, instance, data).await?;
      files += 1;

      let node = proto::FileNode {
        name: entry_name(&entry)?,
        digest: Some(digest.to_wire()),
        is_executable: metadata.permissions().mode() & 0o111 != 0,
      };
      pending.entry(parent_of(path)).or_default().files.push(node);
    } else {
      return Err(UploadError::UnsupportedFileType {
        path: path.to_path_buf(),
      });
    }
  }

  // The walk always yields the root last, unless the root is not a directory.
  Err(UploadError::UnsupportedFileType {
    path: root.to_path_buf(),
  })
}

fn entry_name(entry: &walkdir::DirEntry) -> Result<String, UploadError> {
  entry
    .file_name()
    .to_str()
    .map(str::to_string)
    .ok_or_else(|| UploadError::NonUtf8Name {
      path: entry.path().to_path_buf(),
    })
}

fn parent_of(path: &Path) -> PathBuf {
  path.parent().map(Path::to_path_buf).unwrap_or_default()
}
