mod cas;
mod run;
mod upload;

use anyhow::{Context, Result};

use buildbox_lib::blobstore::{DiskBlobStore, IntegrityGuardedStore};
use buildbox_lib::digest::Digest;
use buildbox_lib::platform::paths::store_dir;

pub use cas::{cmd_cas_delete, cmd_cas_find_missing, cmd_cas_get, cmd_cas_put};
pub use run::{RunArgs, cmd_run};
pub use upload::cmd_upload;

/// Every command reads and writes through the integrity guard.
pub(crate) type Store = IntegrityGuardedStore<DiskBlobStore>;

pub(crate) fn open_store() -> Result<Store> {
  let root = store_dir();
  let disk = DiskBlobStore::open(&root).with_context(|| format!("Failed to open store at {}", root.display()))?;
  Ok(IntegrityGuardedStore::new(disk))
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

pub(crate) fn parse_digest(instance: &str, input: &str) -> Result<Digest> {
  let digest = Digest::parse(instance, input)?;
  digest.decode()?;
  Ok(digest)
}

/// JSON view of a digest.
#[derive(serde::Serialize)]
pub(crate) struct DigestOutput {
  pub instance: String,
  pub hash: String,
  pub size_bytes: i64,
}

impl From<&Digest> for DigestOutput {
  fn from(digest: &Digest) -> Self {
    Self {
      instance: digest.instance.clone(),
      hash: digest.hash.clone(),
      size_bytes: digest.size_bytes,
    }
  }
}
