use predicates::prelude::*;

use super::common::TestEnv;

const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9/11";

#[test]
fn put_prints_sha256_digest() {
  let env = TestEnv::new();

  assert_eq!(env.put("hello.txt", "hello world"), HELLO_DIGEST);
}

#[test]
fn put_then_get_round_trips() {
  let env = TestEnv::new();
  let digest = env.put("hello.txt", "hello world");

  env
    .bbx_cmd()
    .args(["cas", "get", &digest])
    .assert()
    .success()
    .stdout("hello world");
}

#[test]
fn get_writes_to_out_file() {
  let env = TestEnv::new();
  let digest = env.put("hello.txt", "hello world");
  let out = env.temp.path().join("copy.txt");

  env
    .bbx_cmd()
    .args(["cas", "get", &digest, "--out"])
    .arg(&out)
    .assert()
    .success()
    .stderr(predicate::str::contains("Wrote"));

  assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello world");
}

#[test]
fn get_missing_blob_fails() {
  let env = TestEnv::new();

  env
    .bbx_cmd()
    .args(["cas", "get", HELLO_DIGEST])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}

#[test]
fn tampered_blob_is_rejected_and_evicted() {
  let env = TestEnv::new();
  let digest = env.put("hello.txt", "hello world");
  let hash = digest.split('/').next().unwrap();
  let blob = env
    .store_path()
    .join("_")
    .join("sha256")
    .join(&hash[..2])
    .join(format!("{hash}-11"));
  std::fs::write(&blob, "HELLO WORLD").unwrap();

  env.bbx_cmd().args(["cas", "get", &digest]).assert().failure();

  assert!(!blob.exists());
  env
    .bbx_cmd()
    .args(["cas", "find-missing", &digest])
    .assert()
    .success()
    .stdout(predicate::str::contains(&digest));
}

#[test]
fn instances_are_isolated() {
  let env = TestEnv::new();
  let digest = env.put("hello.txt", "hello world");

  env
    .bbx_cmd()
    .args(["--instance", "other", "cas", "get", &digest])
    .assert()
    .failure();
}

#[test]
fn find_missing_lists_only_absent_digests() {
  let env = TestEnv::new();
  let present = env.put("hello.txt", "hello world");
  let absent = format!("{}/1", "0".repeat(64));

  env
    .bbx_cmd()
    .args(["cas", "find-missing", &present, &absent])
    .assert()
    .success()
    .stdout(predicate::str::contains(&absent))
    .stdout(predicate::str::contains(&present).not());
}

#[test]
fn delete_removes_blob() {
  let env = TestEnv::new();
  let digest = env.put("hello.txt", "hello world");

  env.bbx_cmd().args(["cas", "delete", &digest]).assert().success();

  env
    .bbx_cmd()
    .args(["cas", "find-missing", &digest])
    .assert()
    .success()
    .stdout(predicate::str::contains(&digest));
}

#[test]
fn json_output_is_valid() {
  let env = TestEnv::new();
  let file = env.write_file("hello.txt", "hello world");

  let output = env
    .bbx_cmd()
    .args(["-o", "json", "cas", "put"])
    .arg(file)
    .output()
    .unwrap();

  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["size_bytes"], 11);
  assert_eq!(value["instance"], "");
}
