use assert_cmd::Command;
use predicates::prelude::*;

fn subview() -> Command {
    Command::cargo_bin("subview").expect("subview binary")
}

#[test]
fn prints_version() {
    subview()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    subview()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("subview"))
        .stdout(predicate::str::contains("--offline"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn requires_subreddit() {
    subview()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error: missing <SUBREDDIT>"));
}

#[test]
fn rejects_unknown_sort() {
    subview()
        .args(["--sort", "sideways", "rust"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown sort"));
}

#[test]
fn rejects_unknown_flag() {
    subview()
        .args(["--frobnicate", "rust"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown option --frobnicate"));
}

#[test]
fn missing_config_file_fails_before_ui() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    subview()
        .args(["--offline", "--config"])
        .arg(&path)
        .arg("rust")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("load config"));
}
