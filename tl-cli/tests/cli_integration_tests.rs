//! Integration tests for the TL CLI binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn tl_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{contents}").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("tl"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_run_tensor_query() {
    let file = tl_file("A = [1, 2, 3]\nA[1]?");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("A[1] = 2"));
}

#[test]
fn test_run_matrix_multiplication() {
    let file = tl_file("A = [[1,2],[3,4]]\nB = [[5,6],[7,8]]\nC[i,k] = A[i,j] B[j,k]\nC?");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg(file.path()).assert().success().stdout(predicate::str::contains("C ="));
}

#[test]
fn test_run_datalog_query() {
    let file = tl_file("Parent(Alice, Bob)\nParent(Alice, Bob)?");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg(file.path()).assert().success().stdout(predicate::str::contains("True"));
}

#[test]
fn test_run_missing_file() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg("/nonexistent/file.tl").assert().failure();
}

#[test]
fn test_run_parse_error_fails() {
    let file = tl_file("A = [1, 2");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg(file.path()).assert().failure();
}

#[test]
fn test_run_verbose_flag() {
    let file = tl_file("A = [1, 2, 3]\nA[0]?");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("--verbose").arg("run").arg(file.path()).assert().success();
}

#[test]
fn test_check_valid_program() {
    let file = tl_file("A = [1, 2, 3]\nAncestor(x, y) <- Parent(x, y)");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("check")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("statements: 2"));
}

#[test]
fn test_check_invalid_program() {
    let file = tl_file("A = [1, 2");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("check")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("is invalid"));
}

#[test]
fn test_check_missing_file() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("check").arg("/nonexistent/file.tl").assert().failure();
}

#[test]
fn test_run_without_file_argument() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").assert().failure().stderr(predicate::str::contains("required"));
}

#[test]
fn test_unknown_command() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("unknown").assert().failure().stderr(predicate::str::contains("unrecognized"));
}

#[test]
fn test_cli_no_args() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_run_help() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run a TL program"));
}

#[test]
fn test_check_help() {
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("check")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Parse a TL program"));
}

#[test]
fn test_run_recursive_rule_query() {
    let file = tl_file(
        "Parent(Alice, Bob)\nParent(Bob, Carol)\nAncestor(x, y) <- Parent(x, y)\nAncestor(x, z) <- Parent(x, y), Ancestor(y, z)\nAncestor(Alice, Carol)?",
    );
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg(file.path()).assert().success().stdout(predicate::str::contains("True"));
}

#[test]
fn test_run_missing_tensor_query_fails() {
    let file = tl_file("Nope?");
    let mut cmd = Command::cargo_bin("tl").unwrap();
    cmd.arg("run").arg(file.path()).assert().failure();
}
