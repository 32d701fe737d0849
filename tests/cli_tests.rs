//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn bridge() -> Command {
    Command::cargo_bin("pipes-bridge").unwrap()
}

/// Shell wrapper that runs the hidden echo worker of this binary.
#[cfg(unix)]
fn echo_worker_script(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let binary = assert_cmd::cargo::cargo_bin("pipes-bridge");
    let script = dir.join("echo-worker.sh");
    std::fs::write(
        &script,
        format!("#!/bin/bash\nexec \"{}\" echo-worker --echo\n", binary.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[test]
fn test_cli_help_flag() {
    bridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("map"))
        .stdout(predicate::str::contains("splits"))
        .stdout(predicate::str::contains("echo-worker").not());
}

#[test]
fn test_invalid_command() {
    bridge()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_splits_write_then_dump() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("splits.bin");

    bridge()
        .args(["splits", "write"])
        .arg(&file)
        .args(["range:0-99", "range:100-199"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 2 splits"));

    bridge()
        .args(["splits", "dump"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("0\trange\t4\t0-99"))
        .stdout(predicate::str::contains("1\trange\t7\t100-199"));
}

#[test]
fn test_splits_dump_missing_file() {
    let temp = TempDir::new().unwrap();
    bridge()
        .args(["splits", "dump"])
        .arg(temp.path().join("absent.bin"))
        .assert()
        .failure()
        .code(7)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_map_with_missing_program_fails() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("input.txt");
    std::fs::write(&input, "hello\n").unwrap();

    bridge()
        .arg("map")
        .arg("--program")
        .arg(temp.path().join("no-such-worker"))
        .arg("--input")
        .arg(&input)
        .arg("--work-dir")
        .arg(temp.path())
        .assert()
        .failure()
        .code(6)
        .stderr(predicate::str::contains("no-such-worker"));
}

#[cfg(unix)]
#[test]
fn test_map_through_echo_worker() {
    let temp = TempDir::new().unwrap();
    let script = echo_worker_script(temp.path());
    let input = temp.path().join("input.txt");
    std::fs::write(&input, "hello\nworld\n").unwrap();
    let output = temp.path().join("out.tsv");

    bridge()
        .arg("map")
        .arg("--program")
        .arg(&script)
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .arg("--work-dir")
        .arg(temp.path())
        .assert()
        .success();

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        written,
        "0000000000000000\thello\n0000000000000006\tworld\n"
    );
    assert!(!temp.path().join("jobTokenPassword").exists());
}

#[cfg(unix)]
#[test]
fn test_reduce_through_echo_worker() {
    let temp = TempDir::new().unwrap();
    let script = echo_worker_script(temp.path());
    let input = temp.path().join("pairs.tsv");
    std::fs::write(&input, "apple\t1\napple\t2\npear\t3\n").unwrap();

    bridge()
        .arg("reduce")
        .arg("--program")
        .arg(&script)
        .arg("--input")
        .arg(&input)
        .arg("--work-dir")
        .arg(temp.path())
        .assert()
        .success()
        .stdout("apple\t1\napple\t2\npear\t3\n");
}
