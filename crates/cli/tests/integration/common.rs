//! Shared test helpers for CLI integration tests.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own store and workspace below one temporary directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    // The sandbox user must be able to reach the build root.
    std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    Self { temp }
  }

  /// Write a file relative to the temp directory and return its path.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  pub fn workspace_path(&self) -> PathBuf {
    self.temp.path().join("workspace")
  }

  /// Get a pre-configured Command for the bbx binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `BBX_STORE`: Isolated blob store
  /// - `BBX_WORKSPACE`: Isolated build workspace
  /// - `XDG_DATA_HOME` / `XDG_CACHE_HOME`: Isolated fallbacks
  pub fn bbx_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("bbx");
    cmd.env("BBX_STORE", self.store_path());
    cmd.env("BBX_WORKSPACE", self.workspace_path());
    cmd.env("XDG_DATA_HOME", self.temp.path().join("data"));
    cmd.env("XDG_CACHE_HOME", self.temp.path().join("cache"));
    cmd
  }

  /// Store `content` and return the printed `<hash>/<size>` digest.
  pub fn put(&self, relative_path: &str, content: &str) -> String {
    let file = self.write_file(relative_path, content);
    let output = self.bbx_cmd().args(["cas", "put"]).arg(file).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8(output.stdout).unwrap().trim().to_string()
  }
}

impl Drop for TestEnv {
  fn drop(&mut self) {
    // The materialized input root is read-only.
    let _ = std::process::Command::new("chmod")
      .args(["-R", "u+w"])
      .arg(self.temp.path())
      .status();
  }
}
