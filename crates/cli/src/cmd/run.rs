//! `bbx run`: execute a command locally as a remote-execution action.
//!
//! The input root and the command are uploaded to the store first, so the
//! worker sees exactly what a remote client would have sent.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use buildbox_lib::execute::{ActionResult, Credentials, ExecutorConfig, LocalExecutor};
use buildbox_lib::proto;
use buildbox_lib::tree::{upload_directory, upload_message, validate_relative_path};
use buildbox_lib::workspace::BuildWorkspace;

use crate::cmd::{DigestOutput, open_store, runtime};
use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_warning};

#[derive(Args, Debug)]
pub struct RunArgs {
  /// Directory uploaded as the action's input root (empty if omitted)
  #[arg(long, value_name = "DIR")]
  pub input_root: Option<PathBuf>,

  /// Declared output file, relative to the build root (repeatable)
  #[arg(long = "output-file", value_name = "PATH")]
  pub output_files: Vec<String>,

  /// Environment variable for the command, as KEY=VALUE (repeatable)
  #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
  pub env: Vec<(String, String)>,

  /// Kill the command after this long (e.g. "30s", "5m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,

  /// Run the command as UID:GID instead of the default
  #[arg(long, value_name = "UID:GID")]
  pub run_as: Option<Credentials>,

  /// Workspace directory (default: $BBX_WORKSPACE or the cache directory)
  #[arg(long, value_name = "DIR")]
  pub workspace: Option<PathBuf>,

  /// Write collected output files below this directory
  #[arg(long, value_name = "DIR")]
  pub out_dir: Option<PathBuf>,

  /// Command and its arguments
  #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGV")]
  pub argv: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, _)) if key.is_empty() => Err(format!("empty variable name in {s:?}")),
    Some((key, value)) => Ok((key.to_string(), value.to_string())),
    None => Err(format!("expected KEY=VALUE, got {s:?}")),
  }
}

#[derive(Serialize)]
struct RunOutput {
  action: DigestOutput,
  input_root: DigestOutput,
  exit_code: i32,
  stdout: String,
  stderr: String,
  output_files: Vec<OutputFileOutput>,
  duration_ms: u128,
}

#[derive(Serialize)]
struct OutputFileOutput {
  path: String,
  size_bytes: usize,
  is_executable: bool,
}

/// Run the command and return its exit code.
pub fn cmd_run(args: RunArgs, instance: &str, output: OutputFormat) -> Result<i32> {
  let start = Instant::now();

  let workspace = match &args.workspace {
    Some(dir) => BuildWorkspace::new(dir),
    None => BuildWorkspace::from_env(),
  };
  let _lock = workspace.lock("run").context("Failed to acquire workspace lock")?;

  let config = ExecutorConfig {
    run_as: args.run_as.or_else(Credentials::default_for_worker),
    timeout: args.timeout,
  };
  debug!(?config, workspace = ?workspace.base(), "starting local execution");
  let executor = LocalExecutor::new(open_store()?, config);
  let store = executor.store();

  let rt = runtime()?;
  let (request, action_digest, input_root) = rt.block_on(async {
    let input_root = match &args.input_root {
      Some(dir) => upload_directory(store, instance, dir)
        .await
        .with_context(|| format!("Failed to upload input root {}", dir.display()))?,
      None => upload_message(store, instance, &proto::Directory::default()).await?,
    };
    let command = proto::Command::new(args.argv.clone(), args.env.iter().cloned());
    let command_digest = upload_message(store, instance, &command).await?;

    let action = proto::Action {
      command_digest: Some(command_digest.to_wire()),
      input_root_digest: Some(input_root.to_wire()),
      output_files: args.output_files.clone(),
      output_directories: Vec::new(),
    };
    let action_digest = upload_message(store, instance, &action).await?;

    let request = proto::ExecuteRequest {
      instance_name: instance.to_string(),
      action: Some(action),
    };
    anyhow::Ok((request, action_digest, input_root))
  })?;

  let result = rt
    .block_on(async {
      let result = executor.execute_until(&request, &workspace, interrupted()).await;
      store.settle().await;
      result
    })
    .context("Execution failed")?;

  if let Some(dir) = &args.out_dir {
    write_outputs(dir, &result)?;
  }

  if output.is_json() {
    print_json(&RunOutput {
      action: DigestOutput::from(&action_digest),
      input_root: DigestOutput::from(&input_root),
      exit_code: result.exit_code,
      stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
      output_files: result
        .output_files
        .iter()
        .map(|f| OutputFileOutput {
          path: f.path.clone(),
          size_bytes: f.content.len(),
          is_executable: f.is_executable,
        })
        .collect(),
      duration_ms: start.elapsed().as_millis(),
    })?;
  } else {
    print_text(&result, &args.output_files)?;
    print_stat("Exit code", &result.exit_code.to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(result.exit_code)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
  if tokio::signal::ctrl_c().await.is_err() {
    std::future::pending::<()>().await;
  }
}

fn print_text(result: &ActionResult, declared: &[String]) -> Result<()> {
  use std::io::Write;

  std::io::stdout().lock().write_all(&result.stdout)?;
  std::io::stderr().lock().write_all(&result.stderr)?;

  for path in declared {
    match result.output_file(path) {
      Some(file) => {
        let exec = if file.is_executable { " (executable)" } else { "" };
        print_stat(path, &format!("{}{exec}", format_bytes(file.content.len() as u64)));
      }
      None => print_warning(&format!("Output {path} was not produced")),
    }
  }
  Ok(())
}

fn write_outputs(dir: &Path, result: &ActionResult) -> Result<()> {
  for file in &result.output_files {
    let path = dir.join(validate_relative_path(&file.path)?);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, &file.content).with_context(|| format!("Failed to write {}", path.display()))?;
    let mode = if file.is_executable { 0o755 } else { 0o644 };
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
      .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
  }
  Ok(())
}
