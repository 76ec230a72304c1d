//! End-to-end CLI tests using `assert_cmd`.
//!
//! These tests invoke the actual compiled binary and verify exit codes
//! and output. No network access is required; failures are provoked
//! before any provider call.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// A command isolated from the developer's real credentials and config
/// file.
fn cmd(config_home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("tarjuman").unwrap();
    cmd.env_remove("ANTHROPIC_API_KEY")
        .env_remove("GOOGLE_TRANSLATE_API_KEY")
        .env_remove("DEEPL_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env("XDG_CONFIG_HOME", config_home)
        .env("HOME", config_home);
    cmd
}

#[test]
fn test_help_shows_flags() {
    let dir = tempdir().unwrap();
    cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--source-lang"))
        .stdout(predicate::str::contains("--target-lang"))
        .stdout(predicate::str::contains("--no-ensemble"))
        .stdout(predicate::str::contains("--force-multi"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_version() {
    let dir = tempdir().unwrap();
    cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tarjuman"));
}

#[test]
fn test_fails_without_any_backend_credentials() {
    let dir = tempdir().unwrap();
    cmd(dir.path())
        .write_stdin("أهلا بالعالم")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no translation backends"));
}

#[test]
fn test_rejects_empty_stdin() {
    let dir = tempdir().unwrap();
    cmd(dir.path())
        .env("ANTHROPIC_API_KEY", "sk-test-not-a-real-key")
        .write_stdin("   \n\t  ")
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn test_missing_input_file_is_an_error() {
    let dir = tempdir().unwrap();
    cmd(dir.path())
        .env("ANTHROPIC_API_KEY", "sk-test-not-a-real-key")
        .arg("/definitely/not/a/real/file.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read input file"));
}
