mod commands;
mod config;
mod listener;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(clap::Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "/etc/reaper.yaml", env = "REAPER_CONFIG")]
    config: PathBuf,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Validate the config file
    Check,
    /// Print the control-plane API token
    Token,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
        Commands::Token => crate::commands::token::command(&cli).await,
    }
}
