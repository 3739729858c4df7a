//! autoloop: autonomous directive loop for local LLMs
//!
//! Repeatedly asks a model what to do, runs the directive it answers with and
//! feeds the result back through a persistent memory log.

mod agent;
mod commands;
mod config;
mod directive;
mod dispatch;
mod memory;
mod prompt;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::RunArgs;
use config::Settings;

#[derive(Debug, Parser)]
#[command(name = "autoloop")]
#[command(about = "Autonomous directive loop for local LLMs", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: autoloop.toml in this or a parent directory)
    #[arg(short, long, global = true, env = "AUTOLOOP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the control loop (default)
    Run(RunArgs),

    /// Show which directive a piece of model output parses to
    Parse {
        /// Text to parse (reads stdin when omitted)
        text: Vec<String>,
    },

    /// Inspect or reset the memory log
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Check that the model backend is reachable
    Health,

    /// Write a commented autoloop.toml into the current directory
    InitConfig,
}

#[derive(Debug, Subcommand)]
enum MemoryAction {
    /// Print the memory log
    Show,
    /// Print the memory file location
    Path,
    /// Delete the memory log
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(Commands::InitConfig) = cli.command {
        return commands::init_config();
    }

    let (settings, source) = Settings::load(cli.config.as_deref())?;
    if let Some(ref path) = source {
        tracing::debug!(path = %path.display(), "Loaded settings");
    }

    match cli.command {
        Some(Commands::Run(args)) => commands::run(settings, args).await,
        Some(Commands::Parse { text }) => commands::parse(&text),
        Some(Commands::Memory { action }) => match action {
            MemoryAction::Show => commands::memory_show(&settings),
            MemoryAction::Path => commands::memory_path(&settings),
            MemoryAction::Clear => commands::memory_clear(&settings),
        },
        Some(Commands::Health) => commands::health(&settings).await,
        Some(Commands::InitConfig) => commands::init_config(),
        None => commands::run(settings, RunArgs::default()).await,
    }
}
