//! Check-config command - parses and validates a configuration file.

use crate::cli::args::CheckConfigArgs;
use crate::core::config::Config;
use anyhow::Result;

pub fn run_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    println!(
        "ok: listener {} with {} mapping(s)",
        config.listener.bind,
        config.mappings.len()
    );
    Ok(())
}
