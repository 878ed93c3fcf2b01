use std::path::Path;

use anyhow::{Context, Result};

use buildbox_lib::tree::upload_directory;

use crate::cmd::{DigestOutput, open_store, runtime};
use crate::output::{OutputFormat, print_json};

/// Upload `dir` as a Merkle tree and print the root digest.
pub fn cmd_upload(dir: &Path, instance: &str, output: OutputFormat) -> Result<()> {
  let store = open_store()?;

  let digest = runtime()?
    .block_on(upload_directory(&store, instance, dir))
    .with_context(|| format!("Failed to upload {}", dir.display()))?;

  if output.is_json() {
    print_json(&DigestOutput::from(&digest))?;
  } else {
    println!("{}", digest.short());
  }
  Ok(())
}
