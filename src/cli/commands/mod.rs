//! CLI command implementations.

mod check;
mod send;
mod start;

pub use check::run_check_config;
pub use send::run_send;
pub use start::run_start;
