use std::path::PathBuf;

use alcogate::{cli, Config};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "alcogate")]
#[command(about = "Breath-alcohol access kiosk")]
struct Cli {
    /// Configuration file (default: configs/alcogate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable development mode (keeps data under ./dev_data, verbose logs)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kiosk
    Run,
    /// Rebuild face descriptors from stored crops
    Reindex,
    /// Measure the gas sensor baseline
    Calibrate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run => cli::run_kiosk(&config, cli.dev)?,
        Commands::Reindex => cli::reindex(&config, cli.dev)?,
        Commands::Calibrate => cli::calibrate(&config)?,
    }

    Ok(())
}

/// Logs go to stderr so they do not tear the kiosk screen.
fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }
}
