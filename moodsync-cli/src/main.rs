use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod auto_sync;
mod commands;
mod config;
mod device;

use auto_sync::try_auto_sync;
use commands::{
    AttachCommand, ChartCommand, ConfigCommand, DeleteCommand, EditCommand, HistoryCommand,
    LogCommand, MapCommand, ShowCommand, StatsCommand, SyncCommand,
};
use config::Config;
use device::Device;

#[derive(Parser)]
#[command(name = "mood")]
#[command(version)]
#[command(about = "An offline-first mood journal that syncs across devices", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a mood
    Log(LogCommand),

    /// Change a recorded mood
    Edit(EditCommand),

    /// Delete a recorded mood
    Delete(DeleteCommand),

    /// Show one recorded mood
    Show(ShowCommand),

    /// List recorded moods
    History(HistoryCommand),

    /// Attach a photo to a recorded mood
    Attach(AttachCommand),

    /// Monthly recap
    Stats(StatsCommand),

    /// Mood score over time
    Chart(ChartCommand),

    /// Mood locations, clustered
    Map(MapCommand),

    /// Manage configuration
    Config(ConfigCommand),

    /// Sync with remote server
    Sync(SyncCommand),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    // Config commands work without opening the database
    match &cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config, cli_config_path),
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
        Some(_) => {}
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let device = Device::open(&config).await?;

        // Auto-sync BEFORE read commands
        if is_read_command(&cli.command) {
            try_auto_sync(&device, &config).await;
        }

        let result = execute_command(&cli.command, &device, &config).await;

        // Auto-sync AFTER write commands (only if command succeeded)
        if result.is_ok() && is_write_command(&cli.command) {
            try_auto_sync(&device, &config).await;
        }

        result
    })
}

async fn execute_command(
    command: &Option<Commands>,
    device: &Device,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Log(cmd)) => cmd.run(device).await,
        Some(Commands::Edit(cmd)) => cmd.run(device).await,
        Some(Commands::Delete(cmd)) => cmd.run(device).await,
        Some(Commands::Show(cmd)) => cmd.run(device).await,
        Some(Commands::History(cmd)) => cmd.run(device).await,
        Some(Commands::Attach(cmd)) => cmd.run(device, config).await,
        Some(Commands::Stats(cmd)) => cmd.run(device).await,
        Some(Commands::Chart(cmd)) => cmd.run(device).await,
        Some(Commands::Map(cmd)) => cmd.run(device).await,
        Some(Commands::Sync(cmd)) => cmd.run(device, config).await,
        Some(Commands::Config(_)) | None => Ok(()),
    }
}

/// Returns true if the command is a read operation that should sync before execution.
fn is_read_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(
            Commands::Show(_)
                | Commands::History(_)
                | Commands::Stats(_)
                | Commands::Chart(_)
                | Commands::Map(_)
        )
    )
}

/// Returns true if the command is a write operation that should sync after execution.
fn is_write_command(cmd: &Option<Commands>) -> bool {
    matches!(
        cmd,
        Some(Commands::Log(_) | Commands::Edit(_) | Commands::Delete(_) | Commands::Attach(_))
    )
}
