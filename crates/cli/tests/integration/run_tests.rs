use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn run_prints_command_output() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .args(["run", "--", "/bin/echo", "hi"])
    .assert()
    .success()
    .stdout("hi\n")
    .stderr(predicate::str::contains("Exit code"));
}

#[test]
fn run_propagates_exit_code() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .args(["run", "--", "/bin/sh", "-c", "exit 7"])
    .assert()
    .code(7);
}

#[test]
fn run_sees_only_declared_environment() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .env("LEAKED", "1")
    .args(["run", "--env", "GREETING=hello", "--", "/usr/bin/env"])
    .assert()
    .success()
    .stdout("GREETING=hello\n");
}

#[test]
fn run_reads_input_root() {
  let env = TestEnv::new();
  env.write_file("inputs/data/message.txt", "from the input root\n");

  env
    .bbx_cmd()
    .args(["run", "--input-root"])
    .arg(env.temp.path().join("inputs"))
    .args(["--", "/bin/cat", "data/message.txt"])
    .assert()
    .success()
    .stdout("from the input root\n");
}

#[test]
fn run_collects_output_files() {
  let env = TestEnv::new();
  let out_dir = env.temp.path().join("collected");

  env
    .bbx_cmd()
    .args(["run", "--output-file", "out/result.txt", "--output-file", "never.txt", "--out-dir"])
    .arg(&out_dir)
    .args(["--", "/bin/sh", "-c", "echo built > out/result.txt"])
    .assert()
    .success()
    .stderr(predicate::str::contains("never.txt was not produced"));

  assert_eq!(std::fs::read_to_string(out_dir.join("out/result.txt")).unwrap(), "built\n");
  assert!(!out_dir.join("never.txt").exists());
}

#[test]
fn run_times_out() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .args(["run", "--timeout", "200ms", "--", "/bin/sleep", "30"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("timed out"));
}

#[test]
fn run_json_reports_exit_code_and_outputs() {
  let env = TestEnv::new();

  let output = env
    .bbx_cmd()
    .args(["-o", "json", "run", "--output-file", "a.txt", "--", "/bin/sh", "-c", "printf abc > a.txt; exit 2"])
    .output()
    .unwrap();

  assert_eq!(output.status.code(), Some(2));
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["exit_code"], 2);
  assert_eq!(value["output_files"][0]["path"], "a.txt");
  assert_eq!(value["output_files"][0]["size_bytes"], 3);
}

#[test]
fn missing_program_fails() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .args(["run", "--", "/nonexistent/tool"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("/nonexistent/tool"));
}
