mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, init::InitCommand, rm::RmCommand, snapshots::SnapshotsCommand,
    sync::SyncCommand,
};
use config::Settings;
use snapvault_core::logging::{Logger, LoggerConfig};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "snapvault",
    about = "Content-addressed, deduplicating backups",
    long_about = "Snapvault stores deduplicated, optionally encrypted snapshots and replicates them between repositories"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, env = "SNAPVAULT_REPO", help = "Repository location")]
    repo: Option<String>,

    #[arg(long, global = true, env = "SNAPVAULT_PASSWORD", hide_env_values = true, help = "Repository password")]
    password: Option<String>,

    #[arg(long, global = true, help = "Configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode")]
    quiet: bool,

    #[arg(long, global = true, value_name = "SUBSYSTEMS", help = "Trace subsystems (comma separated, or \"all\")")]
    trace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Initialize a new repository")]
    Init(InitCommand),

    #[command(about = "Create a new backup")]
    Backup(BackupCommand),

    #[command(about = "List snapshots")]
    Snapshots(SnapshotsCommand),

    #[command(about = "Remove snapshots")]
    Rm(RmCommand),

    #[command(about = "Synchronize snapshots with another repository")]
    Sync(SyncCommand),
}

/// Everything a command needs besides its own arguments.
pub struct Context {
    pub repo: Option<String>,
    pub password: Option<String>,
    pub settings: Settings,
    pub logger: Logger,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    init_tracing(cli.verbose, cli.quiet, cli.trace.is_some(), &settings.log_level);

    let mut logger_config = LoggerConfig::default().with_info(!cli.quiet);
    if let Some(subsystems) = &cli.trace {
        logger_config = logger_config.with_trace(subsystems);
    }

    let ctx = Context {
        repo: cli.repo.clone().or_else(|| settings.repository.clone()),
        password: cli.password.clone(),
        logger: Logger::new(logger_config),
        settings,
    };
    debug!("Starting snapvault");

    match &cli.command {
        Commands::Init(cmd) => cmd.run(&ctx).await,
        Commands::Backup(cmd) => cmd.run(&ctx).await,
        Commands::Snapshots(cmd) => cmd.run(&ctx).await,
        Commands::Rm(cmd) => cmd.run(&ctx).await,
        Commands::Sync(cmd) => cmd.run(&ctx).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool, trace: bool, configured: &str) {
    let level = if quiet {
        "warn"
    } else if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        configured
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "snapvault={level},snapvault_core={level},snapvault_backends={level}"
        ))
    });
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: a tracing subscriber was already installed");
    }
}
