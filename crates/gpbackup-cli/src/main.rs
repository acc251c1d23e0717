//! gpbackup CLI - Command-line interface for gpbackup
//!
//! Provides commands for:
//! - Authenticating against Google Photos
//! - Running a backup (or previewing one with `--dry-run`)
//! - Inspecting the backup index
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gpbackup_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    auth::AuthCommand, backup::BackupCommand, config::ConfigCommand, status::StatusCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "gpbackup",
    version,
    about = "Mirror a Google Photos library into a local directory"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Authentication commands
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Reconcile the backup directory with the remote library
    Backup(BackupCommand),
    /// Show what the backup index holds
    Status(StatusCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let logging = Config::load_or_default(&config_path).logging;

    // Setup tracing
    let filter = if cli.quiet {
        "warn".to_string()
    } else {
        match cli.verbose {
            0 => logging.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so that `--json` output on stdout stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Auth(cmd) => cmd.execute(&config_path, format).await,
        Commands::Backup(cmd) => cmd.execute(&config_path, format).await,
        Commands::Status(cmd) => cmd.execute(&config_path, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}
