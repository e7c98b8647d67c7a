//! Portico - unified CLI entrypoint.
//!
//! Usage:
//!   portico start --config config/portico.json
//!   portico send --address 127.0.0.1:5672 --endpoint telemetry/ward-7 --body '{"t":21}'
//!   portico check-config --config config/portico.json

use anyhow::Result;
use clap::Parser;
use portico::cli::commands::{run_check_config, run_send, run_start};
use portico::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::Send(args) => run_send(args),
        Commands::CheckConfig(args) => run_check_config(args),
    }
}
