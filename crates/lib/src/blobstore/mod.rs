//! Blob storage.
//!
//! [`BlobStore`] is the narrow interface every storage layer implements.
//! Layers compose by construction: a concrete store ([`MemoryBlobStore`],
//! [`DiskBlobStore`]) is wrapped by [`IntegrityGuardedStore`], which is what the
//! rest of the crate reads through.
//!
//! ```text
//! executor / materializer
//!          │
//! IntegrityGuardedStore   digest validation, streaming checksum, eviction
//!          │
//! DiskBlobStore | MemoryBlobStore | ...
//! ```

mod disk;
mod guarded;
mod integrity;
mod memory;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::{Digest, DigestError};

pub use disk::DiskBlobStore;
pub use guarded::{CorruptionHandler, DeleteCorruptBlobs, IntegrityGuardedStore};
pub use integrity::{ErrorClass, IntegrityError, Invalidator, ReadState, VerifyingReader, Violation};
pub use memory::MemoryBlobStore;

/// A byte stream produced by or handed to a store.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Errors surfaced by blob stores.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error(transparent)]
  InvalidDigest(#[from] DigestError),

  #[error("blob not found: {0}")]
  NotFound(Digest),

  #[error(transparent)]
  Integrity(#[from] IntegrityError),

  #[error("storage io error: {0}")]
  Io(#[source] io::Error),
}

impl From<io::Error> for StoreError {
  /// Integrity failures travel through `AsyncRead` as `io::Error`; unwrap them
  /// back into their own variant.
  fn from(err: io::Error) -> Self {
    match IntegrityError::from_io(&err) {
      Some(integrity) => StoreError::Integrity(integrity.clone()),
      None => StoreError::Io(err),
    }
  }
}

impl StoreError {
  /// Whether the caller supplied bad input, as opposed to a storage fault.
  pub fn is_caller_fault(&self) -> bool {
    match self {
      StoreError::InvalidDigest(_) => true,
      StoreError::Integrity(e) => e.class == ErrorClass::InvalidArgument,
      StoreError::NotFound(_) | StoreError::Io(_) => false,
    }
  }
}

/// Content-addressed blob storage.
///
/// Each digest carries its own instance name, so a single store can serve
/// several independent namespaces.
#[async_trait]
pub trait BlobStore: Send + Sync {
  /// Open the blob named by `digest`.
  async fn get(&self, digest: &Digest) -> Result<BlobReader, StoreError>;

  /// Store `size_bytes` bytes read from `reader` under `digest`.
  async fn put(&self, digest: &Digest, size_bytes: i64, reader: BlobReader) -> Result<(), StoreError>;

  async fn delete(&self, digest: &Digest) -> Result<(), StoreError>;

  /// Return the subset of `digests` that is not present.
  async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, StoreError>;
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
  async fn get(&self, digest: &Digest) -> Result<BlobReader, StoreError> {
    (**self).get(digest).await
  }

  async fn put(&self, digest: &Digest, size_bytes: i64, reader: BlobReader) -> Result<(), StoreError> {
    (**self).put(digest, size_bytes, reader).await
  }

  async fn delete(&self, digest: &Digest) -> Result<(), StoreError> {
    (**self).delete(digest).await
  }

  async fn find_missing(&self, digests: &[Digest]) -> Result<Vec<Digest>, StoreError> {
    (**self).find_missing(digests).await
  }
}

/// Wrap an in-memory buffer as a [`BlobReader`].
pub fn bytes_reader(data: Vec<u8>) -> BlobReader {
  Box::pin(io::Cursor::new(data))
}

/// Read a whole blob into memory.
pub async fn read_blob<S: BlobStore + ?Sized>(store: &S, digest: &Digest) -> Result<Vec<u8>, StoreError> {
  let mut reader = store.get(digest).await?;
  let mut data = Vec::new();
  reader.read_to_end(&mut data).await?;
  Ok(data)
}

/// Store an in-memory buffer under `digest`.
///
/// The size declared to the store is the digest's own; a buffer of a
/// different length is caught by verification, not trusted.
pub async fn write_blob<S: BlobStore + ?Sized>(store: &S, digest: &Digest, data: Vec<u8>) -> Result<(), StoreError> {
  store.put(digest, digest.size_bytes, bytes_reader(data)).await
}
