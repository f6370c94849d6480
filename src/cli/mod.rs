use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::Identity;
use crate::clipboard::{ClipboardActor, FormatRegistry, SystemClipboard};
use crate::config::Config;
use crate::sync::SyncEngine;
use crate::transport::{self, Client, TransportKind};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TARGET"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "cliprelay")]
#[command(about = "Clipboard synchronization through an untrusted relay")]
#[command(version, long_version = LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Synchronize the clipboard until interrupted (default)")]
    Run(RunArgs),

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides applied on top of the loaded configuration
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Relay URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Shared key (16 hex characters)
    #[arg(long)]
    pub key: Option<String>,

    /// Clipboard watch interval in milliseconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Transport: poll or stream
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// HTTP request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Short id of this machine
    #[arg(long)]
    pub device_id: Option<String>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(self, config: &mut Config) {
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(key) = self.key {
            config.shared_key = key;
        }
        if let Some(interval) = self.interval {
            config.watch_interval_ms = interval;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        if let Some(device_id) = self.device_id {
            config.device_id = Some(device_id);
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

/// Dispatches commands. Each command loads the configuration it needs, so
/// `config init` works without a readable file and `run` validates only after
/// its overrides are applied.
pub struct CliHandler {
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    pub async fn handle_command(
        &self,
        command: Option<Commands>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
            Commands::Run(args) => self.run(args, cancel).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    /// Explicit `--config` file, else `CLIPRELAY_CONFIG`, the default path or defaults
    fn load(&self) -> Result<Config> {
        Config::load_config(self.config_path.as_deref()).context("Failed to load configuration")
    }

    /// Loaded configuration with `args` applied, validated as a whole
    fn resolve(&self, args: RunArgs) -> Result<Config> {
        let mut config = self.load()?;
        args.apply(&mut config);
        config.validate_config()?;
        Ok(config)
    }

    async fn run(&self, args: RunArgs, cancel: CancellationToken) -> Result<()> {
        let config = self.resolve(args)?;

        let (identity, client) = connect(&config)?;

        let clipboard =
            ClipboardActor::spawn(|| SystemClipboard::open(FormatRegistry::with_defaults()))
                .await
                .context("Failed to open the system clipboard")?;

        info!(
            "cliprelay id={} endpoint={} transport={} watch={}ms",
            identity.device_id(),
            config.endpoint,
            config.transport,
            config.watch_interval_ms
        );

        SyncEngine::new(identity, clipboard, client, config.watch_interval())
            .run(cancel)
            .await
    }

    fn handle_config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let mut shown = self.load()?;
                if !shown.shared_key.is_empty() {
                    shown.shared_key = "<hidden>".to_string();
                }
                println!("Current Configuration:");
                print!("{}", toml::to_string_pretty(&shown)?);
            }
            ConfigAction::Init { force } => {
                let path = self.target_path()?;
                Config::generate_example_config(&path, force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                let path = self.target_path()?;
                Config::load_validated(&path)
                    .with_context(|| format!("{} is not valid", path.display()))?;
                println!("Configuration at {} is valid", path.display());
            }
        }
        Ok(())
    }

    /// Explicit `--config` path, else the default location
    fn target_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Config::default_path().context("Could not find config directory"),
        }
    }
}

/// Identity and transport client for a validated configuration
fn connect(config: &Config) -> crate::Result<(Arc<Identity>, Arc<dyn Client>)> {
    let device_id = config
        .device_id
        .clone()
        .unwrap_or_else(Identity::generate_device_id);
    let identity = Arc::new(Identity::new(device_id, &config.shared_key)?);

    let client = transport::build_client(
        config.transport,
        &config.endpoint,
        Arc::clone(&identity),
        config.transport_config(),
    )?;
    Ok((identity, client))
}
