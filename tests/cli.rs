use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Scripts directory with one bash script plus a config file pointing at it
fn workspace(script_body: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    fs::create_dir_all(scripts.join("bash")).unwrap();
    fs::write(scripts.join("bash").join("hello.sh"), script_body).unwrap();

    let config = format!(
        r#"
[logging]
level = "warn"

[scripts]
scripts_dir = "{}"
max_execution_time_secs = 10
allowed_scripts = ["hello.sh"]
"#,
        scripts.display()
    );
    fs::write(dir.path().join("scriptgate.toml"), config).unwrap();
    dir
}

fn scriptgate(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scriptgate").unwrap();
    cmd.arg("--config")
        .arg(dir.join("scriptgate.toml"))
        .env_remove("SCRIPTGATE_SCRIPTS_DIR")
        .env_remove("SCRIPTGATE_LOG_LEVEL")
        .env_remove("SCRIPTGATE_LOG_FORMAT")
        .env_remove("SCRIPTGATE_MAX_EXECUTION_SECS");
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("scriptgate").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("scriptgate 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("scriptgate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Run allow-listed scripts for validated users",
        ));
}

#[test]
fn test_cli_run_missing_arguments() {
    let mut cmd = Command::cargo_bin("scriptgate").unwrap();
    cmd.arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_run_script() {
    let dir = workspace("echo \"hello $1\"\n");
    scriptgate(dir.path())
        .args(["run", "hello.sh", "abc1234"])
        .assert()
        .success()
        .stdout("hello abc1234\n");
}

#[test]
fn test_cli_run_passes_extra_arguments() {
    let dir = workspace("echo \"$2 $3\"\n");
    scriptgate(dir.path())
        .args(["run", "hello.sh", "abc1234", "first", "second"])
        .assert()
        .success()
        .stdout("first second\n");
}

#[test]
fn test_cli_run_failing_script() {
    let dir = workspace("echo broken >&2\nexit 3\n");
    scriptgate(dir.path())
        .args(["run", "hello.sh", "abc1234"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken"))
        .stderr(predicate::str::contains("exit status 3"));
}

#[test]
fn test_cli_run_invalid_user_id() {
    let dir = workspace("echo unreachable\n");
    scriptgate(dir.path())
        .args(["run", "hello.sh", "abc"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("invalid user ID format"));
}

#[test]
fn test_cli_run_script_not_allowed() {
    let dir = workspace("echo unreachable\n");
    scriptgate(dir.path())
        .args(["run", "other.sh", "abc1234"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("script not in whitelist"));
}

#[test]
fn test_cli_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scriptgate.toml"), "[logging\nlevel = ").unwrap();
    scriptgate(dir.path())
        .args(["run", "hello.sh", "abc1234"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_cli_missing_scripts_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("scriptgate.toml"),
        "[scripts]\nscripts_dir = \"/definitely/not/here\"\n",
    )
    .unwrap();
    scriptgate(dir.path())
        .args(["run", "script1.py", "abc1234"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to create script executor"));
}
