use anyhow::Result;
use assert_cmd::cargo::cargo_bin_cmd;
use clap::Parser;
use predicates::prelude::predicate;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cliprelay::{
    cli::{Cli, CliHandler, Commands, ConfigAction},
    config::Config,
    transport::TransportKind,
};

/// The binary with its config lookup confined to `home`
fn cliprelay(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("cliprelay");
    cmd.env_remove("CLIPRELAY_CONFIG")
        .env_remove("RUST_LOG")
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"));
    cmd
}

#[tokio::test]
async fn test_cli_parsing() -> Result<()> {
    let cli = Cli::try_parse_from(["cliprelay", "config", "show"])?;
    assert!(matches!(
        cli.command,
        Some(Commands::Config {
            action: ConfigAction::Show
        })
    ));

    let cli = Cli::try_parse_from(["cliprelay", "config", "init", "--force", "-c", "/tmp/x.toml"])?;
    assert!(matches!(
        cli.command,
        Some(Commands::Config {
            action: ConfigAction::Init { force: true }
        })
    ));
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/x.toml")));

    let cli = Cli::try_parse_from(["cliprelay", "run", "--transport", "stream"])?;
    let Some(Commands::Run(args)) = cli.command else {
        panic!("expected run");
    };
    assert_eq!(args.transport, Some(TransportKind::Stream));

    Ok(())
}

#[tokio::test]
async fn test_config_file_round_trip_through_cli() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");

    let init = Cli::try_parse_from([
        "cliprelay",
        "--config",
        config_path.to_str().unwrap(),
        "config",
        "init",
    ])?;
    let handler = CliHandler::new(init.config.clone());
    handler
        .handle_command(init.command, CancellationToken::new())
        .await?;

    let loaded = Config::load_validated(&config_path)?;
    assert_eq!(loaded.shared_key.len(), 16);

    for action in [ConfigAction::Validate, ConfigAction::Show] {
        handler
            .handle_command(Some(Commands::Config { action }), CancellationToken::new())
            .await?;
    }

    Ok(())
}

#[tokio::test]
async fn test_validate_reports_broken_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "shared_key = \"nothex\"\n")?;

    let handler = CliHandler::new(Some(config_path));
    let result = handler
        .handle_command(
            Some(Commands::Config {
                action: ConfigAction::Validate,
            }),
            CancellationToken::new(),
        )
        .await;
    assert!(result.is_err());

    Ok(())
}

#[test]
fn test_init_creates_missing_config_file() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("fresh").join("new.toml");

    cliprelay(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Example configuration written"));
    assert!(path.exists());

    cliprelay(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "validate"])
        .assert()
        .success();
}

// the default location follows XDG_CONFIG_HOME only on Linux
#[cfg(target_os = "linux")]
#[test]
fn test_init_force_replaces_broken_default_config() {
    let home = TempDir::new().unwrap();
    let default_dir = home.path().join(".config").join("cliprelay");
    std::fs::create_dir_all(&default_dir).unwrap();
    let default_path = default_dir.join("config.toml");
    std::fs::write(&default_path, "shared_key = \"bad\"\n").unwrap();

    cliprelay(home.path())
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("shared_key"));

    cliprelay(home.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();

    cliprelay(home.path())
        .arg("--config")
        .arg(&default_path)
        .args(["config", "validate"])
        .assert()
        .success();
}

#[test]
fn test_show_accepts_file_without_key() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("partial.toml");
    std::fs::write(&path, "transport = \"stream\"\n").unwrap();

    cliprelay(home.path())
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("transport = \"stream\""));
}
