//! Merkle integrity enforcement for any [`BlobStore`].
//!
//! Every digest is decoded before the backing store sees it, every blob read
//! or written is streamed through a [`VerifyingReader`], and a blob found to
//! be corrupt on read is reported to a [`CorruptionHandler`]. The default
//! handler deletes the blob so that later existence checks report it missing
//! and clients re-upload it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::blobstore::integrity::{ErrorClass, Invalidator, VerifyingReader};
use crate::blobstore::{BlobReader, BlobStore, StoreError};
use crate::digest::Digest;

/// Receives blobs that failed verification on read.
pub trait CorruptionHandler: Send + Sync {
  fn blob_corrupted(&self, digest: &Digest);
}

/// Evicts corrupted blobs from the backing store in a background task.
///
/// The outcome is only logged; the read that detected the corruption has
/// already failed with an authoritative error. [`settle`](Self::settle)
/// waits for evictions still in flight.
pub struct DeleteCorruptBlobs<S> {
  store: Arc<S>,
  pending: Mutex<JoinSet<()>>,
}

impl<S> DeleteCorruptBlobs<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      pending: Mutex::new(JoinSet::new()),
    }
  }

  /// Wait for every eviction spawned so far.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
    while pending.join_next().await.is_some() {}
  }
}

impl<S: BlobStore + 'static> CorruptionHandler for DeleteCorruptBlobs<S> {
  fn blob_corrupted(&self, digest: &Digest) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!(digest = %digest, "no async runtime available, corrupted blob left in place");
      return;
    };

    let store = self.store.clone();
    let digest = digest.clone();
    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    while pending.try_join_next().is_some() {}
    pending.spawn_on(
      async move {
        match store.delete(&digest).await {
          Ok(()) => info!(digest = %digest, "deleted corrupted blob"),
          Err(e) => warn!(digest = %digest, error = %e, "failed to delete corrupted blob"),
        }
      },
      &runtime,
    );
  }
}

/// Decorator validating that blobs match the digests naming them.
pub struct IntegrityGuardedStore<S> {
  inner: Arc<S>,
  on_corruption: Arc<dyn CorruptionHandler>,
  evictor: Option<Arc<DeleteCorruptBlobs<S>>>,
}

impl<S: BlobStore + 'static> IntegrityGuardedStore<S> {
  /// Guard `inner`, deleting blobs that fail verification on read.
  pub fn new(inner: S) -> Self {
    let inner = Arc::new(inner);
    let evictor = Arc::new(DeleteCorruptBlobs::new(inner.clone()));
    Self {
      on_corruption: evictor.clone(),
      evictor: Some(evictor),
      inner,
    }
  }

  /// Guard `inner`, reporting corrupted blobs to `handler` instead.
  pub fn with_corruption_handler(inner: S, handler: Arc<dyn CorruptionHandler>) -> Self {
    Self {
      inner: Arc::new(inner),
      on_corruption: handler,
      evictor: None,
    }
  }

  pub fn inner(&self) -> &S {
    &self.inner
  }

  /// Wait for pending evictions of corrupted blobs.
  ///
  /// Call before dropping the runtime; tasks still queued there are cancelled.
  /// A no-op with a custom corruption handler.
  pub async fn settle(&self) {
    if let Some(evictor) = &self.evictor {
      evictor.settle().await;
    }
  }
}

#[async_trait]
impl<S: BlobStore + 'static> BlobStore for IntegrityGuardedStore<S> {
  async fn get(&self, digest: &Digest) -> Result<BlobReader, StoreError> {
    let expected = digest.decode()?;
    let reader = self.inner.get(digest).await?;

    let handler = self.on_corruption.clone();
    let suspect = digest.clone();
    let invalidator: Invalidator = Box::new(move || {
      warn!(digest = %suspect, "blob failed verification on read");
      handler.blob_corrupted(&suspect);
    });

    Ok(Box::pin(VerifyingReader::new(
      reader,
      expected,
      ErrorClass::Internal,
      invalidator,
    )))
  }

  async fn put(&self, digest: &Digest, size_bytes: i64, reader: BlobReader) -> Result<(), StoreError> {
    // An invalid digest drops (closes) the caller's stream on return.
    let expected = digest.decode()?;
    if expected.size_bytes as i64 != size_bytes {
      panic!(
        "called into CAS to store non-CAS object: digest {} declares {} bytes, caller declared {}",
        digest, expected.size_bytes, size_bytes
      );
    }

    debug!(digest = %digest, "storing verified blob");
    let verified = VerifyingReader::new(reader, expected, ErrorClass::InvalidArgument, Box::new(|| {}));
    self.inner.put(digest, size_bytes, Box::pin(verified)).await
  }

  async fn delete(&self, digest: &Digest) -> Result<(), StoreError> {
    digest.decode()?;
    self.inner.delete(digest).await
  }

  async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, StoreError> {
    for digest in digests {
      digest.decode()?;
    }
    self.inner.find_missing(digests).await
  }
}
