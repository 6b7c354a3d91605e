use clap::{Parser, Subcommand};
use colored::Colorize;
use idc_groups::cmd;
use idc_groups::config::{Config, ConfigManager};
use idc_groups::error::{self, IdcError};
use idc_groups::tui::{self, TuiOptions};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "idc-groups",
    about = "Manage IAM Identity Center groups from the terminal",
    version,
    long_about = "Interactive terminal UI for IAM Identity Center\n\n\
                  Browse and create groups, manage memberships, and grant or revoke\n\
                  account assignments. Uses the AWS CLI and your configured SSO profiles."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// AWS profile to use (defaults to default_profile in config.toml)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region to use (defaults to default_region in config.toml)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the interactive UI (default)
    Tui,

    /// Show version, platform and file locations
    Version,

    /// Update to the latest release
    Update(cmd::update::UpdateArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(hint) = e.hint() {
            eprintln!("{} {}", "Hint:".yellow().bold(), hint);
        }
        std::process::exit(1);
    }
}

/// File logging; stdout belongs to the TUI. Returns false when disabled.
fn init_logging(manager: &ConfigManager, config: &Config, verbose: bool) -> error::Result<bool> {
    let filter = if verbose {
        EnvFilter::new("idc_groups=debug")
    } else if !config.log_level.trim().is_empty() {
        EnvFilter::try_new(config.log_level.trim())
            .map_err(|e| IdcError::Config(format!("invalid log_level: {}", e)))?
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => return Ok(false),
        }
    };

    let path = manager.log_dir()?.join(format!(
        "idc-groups-{}.log",
        chrono::Local::now().format("%Y%m%d")
    ));
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(true)
}

async fn run() -> error::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::new()?;
    let config = manager.load_config()?;
    if init_logging(&manager, &config, cli.verbose)? {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");
    }

    match cli.command.unwrap_or(Commands::Tui) {
        Commands::Tui => tui::run_tui(TuiOptions {
            profile: cli.profile,
            region: cli.region,
            config,
        })?,
        Commands::Version => cmd::version::run(&manager),
        Commands::Update(args) => cmd::update::run(args).await?,
    }

    Ok(())
}
