//! Content digests.
//!
//! A [`Digest`] names a blob by the hash of its contents plus its size, scoped
//! to an instance namespace. The hash algorithm is implied by the length of
//! the hash string, so the only canonical form is lowercase hex:
//!
//! | hex chars | algorithm |
//! |-----------|-----------|
//! | 64        | SHA-256   |
//! | 96        | SHA-384   |
//! | 128       | SHA-512   |
//!
//! [`Digest::decode`] is the single gate every digest passes before it is
//! allowed anywhere near storage.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::proto;

/// Hash function selected by the length of a digest's hash string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
  Sha256,
  Sha384,
  Sha512,
}

impl HashAlgorithm {
  /// Select the algorithm producing hashes of `len` hex characters.
  pub fn from_hex_len(len: usize) -> Option<Self> {
    match len {
      64 => Some(Self::Sha256),
      96 => Some(Self::Sha384),
      128 => Some(Self::Sha512),
      _ => None,
    }
  }

  /// Number of hex characters in a hash produced by this algorithm.
  pub fn hex_len(self) -> usize {
    match self {
      Self::Sha256 => 64,
      Self::Sha384 => 96,
      Self::Sha512 => 128,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Sha256 => "sha256",
      Self::Sha384 => "sha384",
      Self::Sha512 => "sha512",
    }
  }

  /// A fresh incremental hasher for this algorithm.
  pub fn hasher(self) -> Box<dyn DynDigest + Send> {
    match self {
      Self::Sha256 => Box::new(Sha256::default()),
      Self::Sha384 => Box::new(Sha384::default()),
      Self::Sha512 => Box::new(Sha512::default()),
    }
  }

  /// Hash `data` in one shot, returning lowercase hex.
  pub fn hash_hex(self, data: &[u8]) -> String {
    let mut hasher = self.hasher();
    hasher.update(data);
    hex::encode(hasher.finalize_reset())
  }
}

impl fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Reasons a digest is rejected before reaching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
  #[error("invalid digest: no hash algorithm produces {len}-character hashes")]
  UnknownHashLength { len: usize },

  #[error("invalid digest: non-hexadecimal character {character:?} in digest hash")]
  NonHexCharacter { character: char },

  #[error("invalid digest: negative size {size_bytes}")]
  NegativeSize { size_bytes: i64 },

  #[error("invalid digest string {input:?}: expected <hash>/<size>")]
  Malformed { input: String },
}

/// Identity of a blob: content hash, declared size and instance namespace.
///
/// A `Digest` may hold arbitrary wire input; call [`Digest::decode`] to
/// validate it. The instance never participates in hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest {
  pub instance: String,
  pub hash: String,
  pub size_bytes: i64,
}

/// The validated form of a [`Digest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDigest {
  pub checksum: Vec<u8>,
  pub size_bytes: u64,
  pub algorithm: HashAlgorithm,
}

impl Digest {
  pub fn new(instance: impl Into<String>, hash: impl Into<String>, size_bytes: i64) -> Self {
    Self {
      instance: instance.into(),
      hash: hash.into(),
      size_bytes,
    }
  }

  /// Compute the digest of `data` under `algorithm`.
  pub fn of(instance: impl Into<String>, algorithm: HashAlgorithm, data: &[u8]) -> Self {
    Self::new(instance, algorithm.hash_hex(data), data.len() as i64)
  }

  /// Lift a wire digest into `instance`.
  pub fn from_wire(instance: &str, wire: &proto::Digest) -> Self {
    Self::new(instance, wire.hash.clone(), wire.size_bytes)
  }

  pub fn to_wire(&self) -> proto::Digest {
    proto::Digest {
      hash: self.hash.clone(),
      size_bytes: self.size_bytes,
    }
  }

  /// Parse the `<hash>/<size>` form printed by [`Digest::short`].
  ///
  /// Only the syntax is checked here; the result still has to pass
  /// [`Digest::decode`].
  pub fn parse(instance: impl Into<String>, input: &str) -> Result<Self, DigestError> {
    let malformed = || DigestError::Malformed {
      input: input.to_string(),
    };
    let (hash, size) = input.split_once('/').ok_or_else(malformed)?;
    let size_bytes = i64::from_str(size).map_err(|_| malformed())?;
    Ok(Self::new(instance, hash, size_bytes))
  }

  /// `<hash>/<size>` without the instance.
  pub fn short(&self) -> String {
    format!("{}/{}", self.hash, self.size_bytes)
  }

  /// Validate the digest and decode its checksum.
  ///
  /// Uppercase hex is rejected so that every blob has exactly one textual
  /// name.
  pub fn decode(&self) -> Result<DecodedDigest, DigestError> {
    let algorithm =
      HashAlgorithm::from_hex_len(self.hash.len()).ok_or(DigestError::UnknownHashLength { len: self.hash.len() })?;

    if let Some(character) = self.hash.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
      return Err(DigestError::NonHexCharacter { character });
    }

    let checksum = hex::decode(&self.hash).expect("digest hash failed to decode after its characters were validated");

    if self.size_bytes < 0 {
      return Err(DigestError::NegativeSize {
        size_bytes: self.size_bytes,
      });
    }

    Ok(DecodedDigest {
      checksum,
      size_bytes: self.size_bytes as u64,
      algorithm,
    })
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.instance.is_empty() {
      write!(f, "{}/{}", self.hash, self.size_bytes)
    } else {
      write!(f, "{}/{}/{}", self.instance, self.hash, self.size_bytes)
    }
  }
}
