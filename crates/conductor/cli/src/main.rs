//! Conductor CLI - drive plan files through the engine and maintain
//! snapshot directories.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod builtins;
mod commands;

use commands::{run, snapshots};

/// Conductor CLI application
#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor - policy-gated multi-agent task runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, env = "CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "CONDUCTOR_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file with the built-in agents and tools
    Run(run::RunArgs),

    /// Snapshot directory maintenance
    Snapshots {
        /// Snapshot directory
        #[arg(long, env = "CONDUCTOR_SNAPSHOT_DIR")]
        dir: String,

        #[command(subcommand)]
        command: snapshots::SnapshotCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Run(args) => {
            let result = run::execute(args).await?;
            if !result.success && !result.awaiting_human() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Snapshots { dir, command } => snapshots::execute(command, &dir).await,
    }
}
