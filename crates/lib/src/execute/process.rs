//! Running the action's command.
//!
//! The command runs with exactly the environment it declares, in its own
//! process group, with stdout and stderr captured in full. A timeout or a
//! cancellation kills the whole group with `SIGKILL` and reaps the child
//! before returning.

use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::execute::types::{Credentials, ExecuteError};

/// Captured result of a command that exited.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
  pub exit_code: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

pub(crate) struct ProcessSpec<'a> {
  pub arguments: &'a [String],
  pub environment: &'a [(String, String)],
  pub working_dir: &'a Path,
  pub run_as: Option<Credentials>,
}

enum Outcome {
  Exited(io::Result<ExitStatus>, io::Result<Vec<u8>>, io::Result<Vec<u8>>),
  TimedOut(Duration),
  Cancelled,
}

/// Run `spec` to completion, or until `timeout` elapses or `cancel` resolves.
pub(crate) async fn run_process<C>(
  spec: ProcessSpec<'_>,
  timeout: Option<Duration>,
  cancel: C,
) -> Result<ProcessOutput, ExecuteError>
where
  C: Future<Output = ()>,
{
  let Some((program, args)) = spec.arguments.split_first() else {
    return Err(ExecuteError::MalformedAction("command has no arguments".to_string()));
  };

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(spec.working_dir)
    .env_clear()
    .envs(spec.environment.iter().map(|(k, v)| (k, v)))
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(true);
  if let Some(credentials) = spec.run_as {
    command.uid(credentials.uid).gid(credentials.gid);
  }

  debug!(program = %program, working_dir = ?spec.working_dir, run_as = ?spec.run_as, "spawning process");
  let mut child = command.spawn().map_err(|source| ExecuteError::ExecutionFailure {
    program: program.clone(),
    source,
  })?;
  let pid = child.id();
  let stdout = child.stdout.take();
  let stderr = child.stderr.take();

  let outcome = tokio::select! {
    (status, out, err) = async { tokio::join!(child.wait(), drain(stdout), drain(stderr)) } => {
      Outcome::Exited(status, out, err)
    }
    () = expire(timeout) => Outcome::TimedOut(timeout.unwrap_or_default()),
    () = cancel => Outcome::Cancelled,
  };

  let (status, stdout, stderr) = match outcome {
    Outcome::Exited(status, stdout, stderr) => (status, stdout, stderr),
    Outcome::TimedOut(timeout) => {
      warn!(program = %program, ?timeout, "command timed out, killing process group");
      terminate(pid, &mut child).await;
      return Err(ExecuteError::Timeout { timeout });
    }
    Outcome::Cancelled => {
      info!(program = %program, "execution cancelled, killing process group");
      terminate(pid, &mut child).await;
      return Err(ExecuteError::Cancelled);
    }
  };

  let failure = |source| ExecuteError::ExecutionFailure {
    program: program.clone(),
    source,
  };
  let exit_code = exit_code(status.map_err(failure)?);
  let output = ProcessOutput {
    exit_code,
    stdout: stdout.map_err(failure)?,
    stderr: stderr.map_err(failure)?,
  };

  debug!(
    program = %program,
    exit_code,
    stdout_bytes = output.stdout.len(),
    stderr_bytes = output.stderr.len(),
    "process exited"
  );
  Ok(output)
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
  let mut buf = Vec::new();
  if let Some(mut pipe) = pipe {
    pipe.read_to_end(&mut buf).await?;
  }
  Ok(buf)
}

async fn expire(timeout: Option<Duration>) {
  match timeout {
    Some(timeout) => tokio::time::sleep(timeout).await,
    None => std::future::pending().await,
  }
}

/// Kill the child's whole process group and reap the child.
async fn terminate(pid: Option<u32>, child: &mut tokio::process::Child) {
  if let Some(pid) = pid {
    // SAFETY: killpg only sends a signal. The child leads its own group
    // (process_group(0)), so the group id equals its pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
      warn!(pid, error = %io::Error::last_os_error(), "failed to kill process group");
    }
  }
  if let Err(e) = child.kill().await {
    debug!(error = %e, "child already gone");
  }
}

fn exit_code(status: ExitStatus) -> i32 {
  match (status.code(), status.signal()) {
    (Some(code), _) => code,
    (None, Some(signal)) => 128 + signal,
    (None, None) => -1,
  }
}
