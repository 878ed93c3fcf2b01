use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::blobstore::{BlobReader, BlobStore, StoreError};
use crate::digest::Digest;

/// Volatile store keeping every blob in memory.
///
/// A put is committed only once its stream has been read to the end without
/// error, so a rejected upload never becomes visible.
#[derive(Default)]
pub struct MemoryBlobStore {
  blobs: RwLock<HashMap<Digest, Arc<[u8]>>>,
}

impl MemoryBlobStore {
  /// Insert `data` under `digest` without any verification.
  pub fn insert_unchecked(&self, digest: Digest, data: Vec<u8>) {
    self.blobs.write().unwrap_or_else(PoisonError::into_inner).insert(digest, data.into());
  }

  pub fn contains(&self, digest: &Digest) -> bool {
    self.blobs.read().unwrap_or_else(PoisonError::into_inner).contains_key(digest)
  }

  pub fn len(&self) -> usize {
    self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
  async fn get(&self, digest: &Digest) -> Result<BlobReader, StoreError> {
    let data = self
      .blobs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(digest)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(digest.clone()))?;
    Ok(Box::pin(std::io::Cursor::new(data)))
  }

  async fn put(&self, digest: &Digest, _size_bytes: i64, mut reader: BlobReader) -> Result<(), StoreError> {
    // The declared size comes from the client; grow with the stream instead.
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await?;
    trace!(digest = %digest, len = data.len(), "memory store commit");
    self.insert_unchecked(digest.clone(), data);
    Ok(())
  }

  async fn delete(&self, digest: &Digest) -> Result<(), StoreError> {
    self.blobs.write().unwrap_or_else(PoisonError::into_inner).remove(digest);
    Ok(())
  }

  async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
    Ok(digests.iter().filter(|d| !blobs.contains_key(*d)).cloned().collect())
  }
}
