//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Portico - AMQP 1.0 device-to-broker gateway.
#[derive(Parser)]
#[command(name = "portico")]
#[command(version)]
#[command(about = "Portico IoT gateway and diagnostic tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Start(StartArgs),

    /// Send an AMQP message to a gateway endpoint (device simulator)
    Send(SendArgs),

    /// Parse and validate a configuration file without starting
    CheckConfig(CheckConfigArgs),
}

// -----------------------------------------------------------------------------
// Start command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct StartArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/portico.json")]
    pub config: PathBuf,
}

// -----------------------------------------------------------------------------
// Send command (device simulator)
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct SendArgs {
    /// Gateway address
    #[arg(long, default_value = "127.0.0.1:5672")]
    pub address: String,

    /// Target endpoint name (link attach target)
    #[arg(long)]
    pub endpoint: String,

    /// Message body; read from stdin when omitted
    #[arg(long)]
    pub body: Option<String>,

    /// Application property, key=value (repeatable)
    #[arg(long = "property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,

    /// Number of copies to send
    #[arg(long, default_value_t = 1)]
    pub count: u32,
}

// -----------------------------------------------------------------------------
// Check-config command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct CheckConfigArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/portico.json")]
    pub config: PathBuf,
}
