//! Start command - launches the portico gateway.

use crate::cli::args::StartArgs;
use crate::core::config::Config;
use crate::core::runtime::Gateway;
use crate::ops::telemetry;
use anyhow::Result;
use tracing::info;

pub async fn run_start(args: StartArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let _log_handle = telemetry::init_tracing(config.log_level.as_deref())?;

    let gateway = Gateway::start(config)?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    gateway.shutdown();
    Ok(())
}
