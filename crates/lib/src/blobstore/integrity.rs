//! Streaming checksum verification.
//!
//! [`VerifyingReader`] hashes bytes as they pass through and checks the
//! declared size and checksum exactly once, when the inner stream ends. A
//! stream that runs past its declared size fails on the read that crosses the
//! limit, so an oversized blob is never consumed in full.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use sha2::digest::DynDigest;
use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

use crate::blobstore::BlobReader;
use crate::digest::DecodedDigest;

/// Called once when a size or checksum violation is detected.
pub type Invalidator = Box<dyn FnOnce() + Send>;

/// Who is to blame for an integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Stored data is corrupt.
  Internal,
  /// The client computed a digest that does not match its data.
  InvalidArgument,
}

impl std::fmt::Display for ErrorClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ErrorClass::Internal => f.write_str("internal"),
      ErrorClass::InvalidArgument => f.write_str("invalid argument"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("blob is longer than the expected {expected} bytes")]
  OversizedBlob { expected: u64 },

  #[error("blob is {missing} bytes shorter than expected")]
  UndersizedBlob { missing: u64 },

  #[error("checksum of blob is {actual}, while {expected} was expected")]
  ChecksumMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {violation}")]
pub struct IntegrityError {
  pub class: ErrorClass,
  pub violation: Violation,
}

impl IntegrityError {
  /// Recover an integrity error carried inside an `io::Error`.
  pub fn from_io(err: &io::Error) -> Option<&IntegrityError> {
    err.get_ref().and_then(|inner| inner.downcast_ref::<IntegrityError>())
  }

  fn into_io(self) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, self)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
  Streaming,
  Done,
  Failed,
}

/// Single-use reader enforcing a blob's declared size and checksum.
pub struct VerifyingReader {
  inner: BlobReader,
  expected_checksum: Vec<u8>,
  expected_size: u64,
  remaining: u64,
  hasher: Box<dyn DynDigest + Send>,
  class: ErrorClass,
  invalidator: Option<Invalidator>,
  state: ReadState,
  failure: Option<IntegrityError>,
}

impl VerifyingReader {
  pub fn new(inner: BlobReader, expected: DecodedDigest, class: ErrorClass, invalidator: Invalidator) -> Self {
    Self {
      inner,
      hasher: expected.algorithm.hasher(),
      expected_checksum: expected.checksum,
      expected_size: expected.size_bytes,
      remaining: expected.size_bytes,
      class,
      invalidator: Some(invalidator),
      state: ReadState::Streaming,
      failure: None,
    }
  }

  pub fn state(&self) -> ReadState {
    self.state
  }

  fn fail(&mut self, violation: Violation) -> IntegrityError {
    let err = IntegrityError {
      class: self.class,
      violation,
    };
    if let Some(invalidate) = self.invalidator.take() {
      invalidate();
    }
    self.state = ReadState::Failed;
    self.failure = Some(err.clone());
    err
  }

  fn finish(&mut self) -> Result<(), IntegrityError> {
    if self.remaining != 0 {
      return Err(self.fail(Violation::UndersizedBlob {
        missing: self.remaining,
      }));
    }

    let actual = self.hasher.finalize_reset();
    if actual[..] != self.expected_checksum[..] {
      let violation = Violation::ChecksumMismatch {
        expected: hex::encode(&self.expected_checksum),
        actual: hex::encode(&actual),
      };
      return Err(self.fail(violation));
    }

    self.state = ReadState::Done;
    Ok(())
  }
}

impl AsyncRead for VerifyingReader {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    let this = self.get_mut();

    match this.state {
      ReadState::Done => return Poll::Ready(Ok(())),
      ReadState::Failed => {
        let err = this.failure.clone().map(IntegrityError::into_io);
        return Poll::Ready(Err(err.unwrap_or_else(|| io::Error::other("blob stream already failed"))));
      }
      ReadState::Streaming => {}
    }

    if buf.remaining() == 0 {
      return Poll::Ready(Ok(()));
    }

    let before = buf.filled().len();
    // Errors from the inner stream pass through untouched.
    ready!(this.inner.as_mut().poll_read(cx, buf))?;
    let read = buf.filled().len() - before;

    if read == 0 {
      return Poll::Ready(this.finish().map_err(IntegrityError::into_io));
    }

    if read as u64 > this.remaining {
      buf.set_filled(before);
      let violation = Violation::OversizedBlob {
        expected: this.expected_size,
      };
      return Poll::Ready(Err(this.fail(violation).into_io()));
    }

    this.hasher.update(&buf.filled()[before..]);
    this.remaining -= read as u64;
    Poll::Ready(Ok(()))
  }
}
