//! Command-line behaviour of boost-bot that needs no network

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn boost_bot() -> Command {
    let mut cmd = Command::cargo_bin("boost-bot").unwrap();
    cmd.env_remove("BOOSTCAST_CONFIG")
        .env_remove("BOOSTCAST_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands_and_flags() {
    boost_bot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("set-level:<n>"))
        .stdout(predicate::str::contains("--account-list"))
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--no-web"));
}

#[test]
fn test_version() {
    boost_bot()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_config_exits_with_config_error() -> Result<()> {
    let temp_dir = TempDir::new()?;

    boost_bot()
        .arg("--config")
        .arg(temp_dir.path().join("missing.toml"))
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read config file"));

    Ok(())
}

#[test]
fn test_config_from_env_var() -> Result<()> {
    let temp_dir = TempDir::new()?;

    boost_bot()
        .env("BOOSTCAST_CONFIG", temp_dir.path().join("missing.toml"))
        .arg("--once")
        .assert()
        .code(2);

    Ok(())
}

#[test]
fn test_invalid_config_exits_with_config_error() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[instance]
url = "https://social.example"
client_id = "cid"
client_secret = "csecret"
redirect_uri = "https://bot.example/oauth/verify"

[bot]
access_token = "bot-token"
handle = "boostbot"
source_account = "109000"

[schedule]
poll_interval = "0s"
"#,
    )?;

    boost_bot()
        .arg("--config")
        .arg(&config_path)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("schedule.poll_interval"));

    Ok(())
}

#[test]
fn test_unknown_log_format_is_rejected() {
    boost_bot()
        .args(["--log-format", "xml", "--once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log format"));
}
