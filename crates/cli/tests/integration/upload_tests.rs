use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn upload_is_deterministic() {
  let env = TestEnv::new();
  env.write_file("a/src/main.c", "int main() { return 0; }\n");
  env.write_file("b/src/main.c", "int main() { return 0; }\n");

  let digest_of = |dir: &str| {
    let output = env
      .bbx_cmd()
      .arg("upload")
      .arg(env.temp.path().join(dir))
      .output()
      .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap()
  };

  assert_eq!(digest_of("a"), digest_of("b"));
}

#[test]
fn upload_rejects_symlinks() {
  let env = TestEnv::new();
  let target = env.write_file("tree/real", "x");
  std::os::unix::fs::symlink(&target, env.temp.path().join("tree/link")).unwrap();

  env
    .bbx_cmd()
    .arg("upload")
    .arg(env.temp.path().join("tree"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("link"));
}
