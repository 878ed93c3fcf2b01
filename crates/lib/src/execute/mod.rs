//! Local execution of remote-execution actions.
//!
//! [`LocalExecutor`] runs one action per call inside a [`BuildWorkspace`]:
//!
//! 1. Discard and recreate the build root.
//! 2. Materialize the input root into it.
//! 3. Create the parent directory of every declared output file.
//! 4. Reject output directories, which are not supported yet.
//! 5. Discard and recreate the temp directory.
//! 6. Fetch and decode the command.
//! 7. Run it and capture its exit code, stdout and stderr.
//! 8. Read back the declared output files that exist.
//!
//! Every failure aborts the call. Nothing is retried.

mod outputs;
mod process;
pub mod types;

use std::future::Future;

use prost::Message;
use tracing::{debug, info};

use crate::blobstore::{BlobStore, read_blob};
use crate::digest::Digest;
use crate::proto;
use crate::tree::materialize_tree;
use crate::workspace::BuildWorkspace;

use outputs::{collect_output_files, prepare_output_parents};
use process::{ProcessSpec, run_process};

pub use types::{ActionResult, Credentials, ExecuteError, ExecutorConfig, OutputFile, ParseCredentialsError};

pub struct LocalExecutor<S> {
  store: S,
  config: ExecutorConfig,
}

impl<S: BlobStore> LocalExecutor<S> {
  /// `store` should verify what it serves, i.e. be an
  /// [`IntegrityGuardedStore`](crate::blobstore::IntegrityGuardedStore).
  pub fn new(store: S, config: ExecutorConfig) -> Self {
    Self { store, config }
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Execute `request` in `workspace`, bounded only by the configured timeout.
  pub async fn execute(
    &self,
    request: &proto::ExecuteRequest,
    workspace: &BuildWorkspace,
  ) -> Result<ActionResult, ExecuteError> {
    self.execute_until(request, workspace, std::future::pending()).await
  }

  /// Execute `request`, killing the command if `cancel` resolves first.
  pub async fn execute_until<C>(
    &self,
    request: &proto::ExecuteRequest,
    workspace: &BuildWorkspace,
    cancel: C,
  ) -> Result<ActionResult, ExecuteError>
  where
    C: Future<Output = ()>,
  {
    let instance = request.instance_name.as_str();
    let action = request.action.as_ref().ok_or_else(|| malformed("request carries no action"))?;
    let input_root = action
      .input_root_digest
      .as_ref()
      .ok_or_else(|| malformed("action has no input root digest"))?;
    let command_digest = action
      .command_digest
      .as_ref()
      .ok_or_else(|| malformed("action has no command digest"))?;

    info!(
      instance = %instance,
      command = %Digest::from_wire(instance, command_digest),
      input_root = %Digest::from_wire(instance, input_root),
      "executing action"
    );

    let build_root = workspace.build_root();
    workspace.reset_build_root()?;
    materialize_tree(&self.store, instance, input_root, build_root).await?;
    prepare_output_parents(build_root, &action.output_files)?;

    if !action.output_directories.is_empty() {
      return Err(ExecuteError::UnsupportedFeature(format!(
        "output directories ({} declared)",
        action.output_directories.len()
      )));
    }

    workspace.reset_tmp_dir()?;

    let command = self.fetch_command(&Digest::from_wire(instance, command_digest)).await?;
    if command.arguments.is_empty() {
      return Err(malformed("command has no arguments"));
    }
    let environment: Vec<(String, String)> = command
      .environment_variables
      .into_iter()
      .map(|var| (var.name, var.value))
      .collect();

    let spec = ProcessSpec {
      arguments: &command.arguments,
      environment: &environment,
      working_dir: build_root,
      run_as: self.config.run_as,
    };
    let output = run_process(spec, self.config.timeout, cancel).await?;

    let output_files = collect_output_files(build_root, &action.output_files).await?;
    info!(
      exit_code = output.exit_code,
      outputs = output_files.len(),
      declared = action.output_files.len(),
      "action finished"
    );

    Ok(ActionResult {
      exit_code: output.exit_code,
      stdout: output.stdout,
      stderr: output.stderr,
      output_files,
    })
  }

  async fn fetch_command(&self, digest: &Digest) -> Result<proto::Command, ExecuteError> {
    let bytes = read_blob(&self.store, digest).await?;
    let command = proto::Command::decode(bytes.as_slice())
      .map_err(|e| malformed(format!("failed to decode command {digest}: {e}")))?;
    debug!(digest = %digest, arguments = ?command.arguments, "fetched command");
    Ok(command)
  }
}

fn malformed(message: impl Into<String>) -> ExecuteError {
  ExecuteError::MalformedAction(message.into())
}
