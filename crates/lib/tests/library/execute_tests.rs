//! End-to-end local execution against a disk-backed store.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use buildbox_lib::blobstore::{DiskBlobStore, IntegrityGuardedStore};
use buildbox_lib::execute::{Credentials, ExecuteError, ExecutorConfig, LocalExecutor};
use buildbox_lib::proto;
use buildbox_lib::tree::{upload_directory, upload_message};
use buildbox_lib::workspace::BuildWorkspace;
use tempfile::TempDir;

struct Env {
  temp: TempDir,
  workspace: BuildWorkspace,
  executor: LocalExecutor<IntegrityGuardedStore<DiskBlobStore>>,
}

impl Drop for Env {
  fn drop(&mut self) {
    let _ = self.workspace.clean();
  }
}

fn env(timeout: Option<Duration>) -> Env {
  env_with(ExecutorConfig { run_as: None, timeout })
}

fn env_with(config: ExecutorConfig) -> Env {
  let temp = TempDir::new().unwrap();
  // A sandbox user other than the owner must be able to reach the build root.
  std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
  let store = IntegrityGuardedStore::new(DiskBlobStore::open(temp.path().join("cas")).unwrap());
  let workspace = BuildWorkspace::new(temp.path().join("ws"));
  Env {
    executor: LocalExecutor::new(store, config),
    workspace,
    temp,
  }
}

impl Env {
  async fn request(&self, inputs: &std::path::Path, argv: &[&str], outputs: &[&str]) -> proto::ExecuteRequest {
    let store = self.executor.store();
    let input_root = upload_directory(store, "", inputs).await.unwrap();
    let command = proto::Command::new(argv.iter().map(|s| s.to_string()).collect(), [("PATH", "/usr/bin:/bin")]);
    let command_digest = upload_message(store, "", &command).await.unwrap();
    proto::ExecuteRequest {
      instance_name: String::new(),
      action: Some(proto::Action {
        command_digest: Some(command_digest.to_wire()),
        input_root_digest: Some(input_root.to_wire()),
        output_files: outputs.iter().map(|s| s.to_string()).collect(),
        output_directories: Vec::new(),
      }),
    }
  }

  fn inputs(&self, files: &[(&str, &str)]) -> std::path::PathBuf {
    let dir = self.temp.path().join("inputs");
    for (path, content) in files {
      let path = dir.join(path);
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(path, content).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }
}

#[tokio::test]
async fn compiles_inputs_into_declared_output() {
  let env = env(None);
  let inputs = env.inputs(&[("src/a.txt", "alpha\n"), ("src/b.txt", "beta\n")]);
  let request = env
    .request(&inputs, &["sh", "-c", "cat src/a.txt src/b.txt > out/joined.txt"], &["out/joined.txt"])
    .await;

  let result = env.executor.execute(&request, &env.workspace).await.unwrap();

  assert!(result.success());
  let joined = result.output_file("out/joined.txt").unwrap();
  assert_eq!(joined.content, b"alpha\nbeta\n");
  assert!(!joined.is_executable);
}

#[tokio::test]
async fn consecutive_actions_start_from_a_clean_build_root() {
  let env = env(None);
  let inputs = env.inputs(&[]);

  let first = env.request(&inputs, &["sh", "-c", "echo stale > leftover"], &["leftover"]).await;
  let result = env.executor.execute(&first, &env.workspace).await.unwrap();
  assert_eq!(result.output_files.len(), 1);

  let second = env.request(&inputs, &["sh", "-c", "test -e leftover"], &[]).await;
  let result = env.executor.execute(&second, &env.workspace).await.unwrap();
  assert_eq!(result.exit_code, 1);
}

const WHOAMI_AND_WRITE: &str = "id -u; id -g; echo changed > config 2>/dev/null || echo denied; cat config";

#[tokio::test]
async fn root_worker_runs_command_as_sandbox_user() {
  if !rustix::process::geteuid().is_root() {
    return;
  }
  let env = env_with(ExecutorConfig {
    run_as: Some(Credentials::new(1, 1)),
    timeout: None,
  });
  let inputs = env.inputs(&[("config", "original\n")]);
  let request = env.request(&inputs, &["sh", "-c", WHOAMI_AND_WRITE], &[]).await;

  let result = env.executor.execute(&request, &env.workspace).await.unwrap();

  assert_eq!(
    String::from_utf8(result.stdout).unwrap(),
    "1\n1\ndenied\noriginal\n",
    "stderr: {}",
    String::from_utf8_lossy(&result.stderr)
  );
}

#[tokio::test]
async fn unprivileged_worker_keeps_its_own_credentials() {
  let euid = rustix::process::geteuid();
  if euid.is_root() {
    return;
  }
  let env = env(None);
  let inputs = env.inputs(&[("config", "original\n")]);
  let request = env.request(&inputs, &["sh", "-c", WHOAMI_AND_WRITE], &[]).await;

  let result = env.executor.execute(&request, &env.workspace).await.unwrap();

  let stdout = String::from_utf8(result.stdout).unwrap();
  let lines: Vec<_> = stdout.lines().collect();
  assert_eq!(lines[0], euid.as_raw().to_string());
  assert_eq!(lines[2..], ["denied", "original"]);
}

#[test]
fn default_config_matches_worker_privilege() {
  let expected = rustix::process::geteuid().is_root().then(|| Credentials::new(1, 1));

  assert_eq!(ExecutorConfig::default().run_as, expected);
}

#[tokio::test]
async fn timeout_surfaces_as_error() {
  let env = env(Some(Duration::from_millis(150)));
  let inputs = env.inputs(&[]);
  let request = env.request(&inputs, &["sleep", "30"], &[]).await;

  let err = env.executor.execute(&request, &env.workspace).await.unwrap_err();

  assert!(matches!(err, ExecuteError::Timeout { .. }));
  assert!(!err.is_caller_fault());
}
