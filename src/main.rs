use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod autojudge;
mod commands;
mod config;
mod domain;
mod judge;
mod language;
mod sandbox;
mod sink;
mod staging;
mod store;

use config::Config;

#[derive(Parser)]
#[command(name = "autojudge")]
#[command(
    author,
    version,
    about = "Judge contest submissions inside isolated Docker sandboxes"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "AUTOJUDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge stored submissions
    Run {
        /// Submission ids to judge
        #[arg(required = true)]
        ids: Vec<Uuid>,

        /// Submissions judged in parallel (default: from autojudge.toml)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Show the configured language runtimes
    Languages,

    /// Manage sandbox images
    Image {
        #[command(subcommand)]
        action: commands::image::ImageAction,
    },

    /// Remove orphaned sandbox containers
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("autojudge=debug")
    } else {
        EnvFilter::new("autojudge=info")
    };

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    let config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };

    match cli.command {
        Commands::Run { ids, concurrency } => {
            commands::run::run(&config, ids, concurrency).await?;
        }
        Commands::Languages => {
            commands::languages::run(&config).await?;
        }
        Commands::Image { action } => {
            commands::image::run(&config, action).await?;
        }
        Commands::Clean => {
            commands::clean::run(&config).await?;
        }
    }

    Ok(())
}
