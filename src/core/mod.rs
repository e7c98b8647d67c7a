//! Core runtime infrastructure.
//!
//! This module contains the essential components for running the portico gateway:
//! - `config` - Configuration parsing and validation
//! - `runtime` - Gateway assembly and lifecycle

pub mod config;
pub mod runtime;

pub use config::*;
pub use runtime::*;
