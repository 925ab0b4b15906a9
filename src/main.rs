// ABOUTME: burrow binary: loads config, sets up logging and runs the bot runtime
// ABOUTME: Also writes and checks config files

use anyhow::{Context, Result};
use burrow::config::Config;
use burrow::logging::{init_logging, LogOptions};
use burrow::module::ModuleTable;
use burrow::{paths, Runtime};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "OneBot reverse-WebSocket bot runtime", long_about = None)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit console logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the usual search locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway and modules (default)
    Run,
    /// Write a config file filled with defaults
    InitConfig {
        /// Where to write it; defaults to the user config directory
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load the config, validate it and print the effective values
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(paths::config_file);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, Config::default_toml()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig { path, force } => init_config(path, force),
        Command::CheckConfig => {
            let config = load_config(cli.config.as_ref())?;
            println!("{:#?}", config);
            println!("Config OK");
            Ok(())
        }
        Command::Run => {
            let config = load_config(cli.config.as_ref())?;
            let options = LogOptions {
                level: cli.log_level,
                json: cli.json_logs,
            };
            let _guard = init_logging(&options, &config.logging, &paths::log_dir())?;

            tracing::info!(
                ws_url = %config.gateway.ws_url,
                modules = ?config.bot.modules,
                ring_len = config.events.ring_len,
                data_dir = %config.storage.data_dir,
                "Starting burrow"
            );

            let runtime = Runtime::build(config, ModuleTable::builtin()).await?;
            runtime.run().await
        }
    }
}
