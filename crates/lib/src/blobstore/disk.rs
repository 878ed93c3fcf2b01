//! Filesystem-backed blob store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<instance>/<algorithm>/<hash[..2]>/<hash>-<size>
//! ```
//!
//! The instance directory is `_` for the unnamed instance and the hex encoding
//! of the instance name otherwise, so no caller-controlled text ever becomes a
//! path component. Writes go to a temporary file in the shard directory and are
//! renamed into place once the stream has been read to the end.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::blobstore::{BlobReader, BlobStore, StoreError};
use crate::digest::Digest;

pub struct DiskBlobStore {
  root: PathBuf,
}

impl DiskBlobStore {
  /// Open (creating if needed) a store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;
    info!(root = %root.display(), "opened disk blob store");
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Where the blob named by `digest` lives.
  ///
  /// The digest is decoded first so that its hash is known to be plain hex.
  pub fn blob_path(&self, digest: &Digest) -> Result<PathBuf, StoreError> {
    let decoded = digest.decode()?;
    let instance = if digest.instance.is_empty() {
      "_".to_string()
    } else {
      hex::encode(digest.instance.as_bytes())
    };
    Ok(
      self
        .root
        .join(instance)
        .join(decoded.algorithm.as_str())
        .join(&digest.hash[..2])
        .join(format!("{}-{}", digest.hash, decoded.size_bytes)),
    )
  }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
  async fn get(&self, digest: &Digest) -> Result<BlobReader, StoreError> {
    let path = self.blob_path(digest)?;
    match tokio::fs::File::open(&path).await {
      Ok(file) => Ok(Box::pin(file)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(digest.clone())),
      Err(e) => Err(StoreError::Io(e)),
    }
  }

  async fn put(&self, digest: &Digest, _size_bytes: i64, mut reader: BlobReader) -> Result<(), StoreError> {
    let path = self.blob_path(digest)?;
    let Some(shard) = path.parent() else {
      return Err(StoreError::Io(io::Error::other("blob path has no parent")));
    };
    tokio::fs::create_dir_all(shard).await?;

    // Dropping the temp path on any early return removes the partial file.
    let (file, temp_path) = tempfile::NamedTempFile::new_in(shard)?.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    temp_path.persist(&path).map_err(|e| StoreError::Io(e.error))?;
    debug!(digest = %digest, bytes = written, path = %path.display(), "stored blob");
    Ok(())
  }

  async fn delete(&self, digest: &Digest) -> Result<(), StoreError> {
    let path = self.blob_path(digest)?;
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StoreError::Io(e)),
    }
  }

  async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, StoreError> {
    let mut missing = Vec::new();
    for digest in digests {
      let path = self.blob_path(digest)?;
      if !tokio::fs::try_exists(&path).await? {
        missing.push(digest.clone());
      }
    }
    Ok(missing)
  }
}
