//! `bbx cas`: direct access to the content-addressable store.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use buildbox_lib::blobstore::{BlobStore, read_blob};
use buildbox_lib::tree::upload_blob;

use crate::cmd::{DigestOutput, open_store, parse_digest, runtime};
use crate::output::{OutputFormat, format_bytes, print_json, print_success, truncate_hash};

/// Store the contents of `file` and print its digest.
pub fn cmd_cas_put(file: &Path, instance: &str, output: OutputFormat) -> Result<()> {
  let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
  let store = open_store()?;

  let digest = runtime()?.block_on(upload_blob(&store, instance, data))?;

  if output.is_json() {
    print_json(&DigestOutput::from(&digest))?;
  } else {
    println!("{}", digest.short());
  }
  Ok(())
}

/// Fetch a blob, writing it to `out` or to stdout.
pub fn cmd_cas_get(digest: &str, out: Option<&Path>, instance: &str, output: OutputFormat) -> Result<()> {
  let digest = parse_digest(instance, digest)?;
  let store = open_store()?;

  let data = runtime()?
    .block_on(async {
      let data = read_blob(&store, &digest).await;
      store.settle().await;
      data
    })
    .with_context(|| format!("Failed to read blob {digest}"))?;

  match out {
    Some(path) => {
      std::fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
      if output.is_json() {
        print_json(&DigestOutput::from(&digest))?;
      } else {
        print_success(&format!(
          "Wrote {} ({}) to {}",
          truncate_hash(&digest.hash),
          format_bytes(data.len() as u64),
          path.display()
        ));
      }
    }
    None => {
      let mut stdout = std::io::stdout().lock();
      stdout.write_all(&data).context("Failed to write to stdout")?;
      stdout.flush()?;
    }
  }
  Ok(())
}

pub fn cmd_cas_delete(digest: &str, instance: &str, output: OutputFormat) -> Result<()> {
  let digest = parse_digest(instance, digest)?;
  let store = open_store()?;

  runtime()?.block_on(store.delete(&digest))?;

  if output.is_json() {
    print_json(&DigestOutput::from(&digest))?;
  } else {
    print_success(&format!("Deleted {}", digest.short()));
  }
  Ok(())
}

/// Print the digests among `digests` that the store does not hold.
pub fn cmd_cas_find_missing(digests: &[String], instance: &str, output: OutputFormat) -> Result<()> {
  let digests = digests
    .iter()
    .map(|d| parse_digest(instance, d))
    .collect::<Result<Vec<_>>>()?;
  let store = open_store()?;

  let missing = runtime()?.block_on(store.find_missing(&digests))?;

  if output.is_json() {
    let missing: Vec<DigestOutput> = missing.iter().map(DigestOutput::from).collect();
    print_json(&missing)?;
  } else {
    for digest in &missing {
      println!("{}", digest.short());
    }
  }
  Ok(())
}
