//! Portico CLI - unified command-line interface.
//!
//! Provides a single binary entry point for:
//! - `portico start` - Start the gateway
//! - `portico send` - Send AMQP messages (device simulator)
//! - `portico check-config` - Validate a configuration file

mod args;
pub mod commands;

pub use args::{CheckConfigArgs, Cli, Commands, SendArgs, StartArgs};
