#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Import style
#![allow(clippy::wildcard_imports)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
// Control flow style
#![allow(clippy::if_not_else)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_match_else)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::manual_let_else)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
// Self usage
#![allow(clippy::unused_self)]
#![allow(clippy::used_underscore_binding)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Type defaults
#![allow(clippy::default_trait_access)]
// Large types
#![allow(clippy::large_enum_variant)]
// Explicit returns
#![allow(clippy::needless_return)]
#![allow(clippy::semicolon_if_nothing_returned)]
// Cast wrapping
#![allow(clippy::cast_possible_wrap)]
// Iteration style
#![allow(clippy::explicit_iter_loop)]

//! Portico - AMQP 1.0 device-to-broker IoT gateway.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::runtime` - Gateway assembly and lifecycle
//!
//! ## Broker
//! - `broker` - Envelope, property bag, and the publish seam
//! - `broker::local` - In-process broker delivering to attached sinks
//!
//! ## Modules
//! - `modules::amqp_server` - AMQP 1.0 ingress (listener, connections, sessions, links)
//! - `modules::mapping` - Endpoint-to-device-identity mapping table
//! - `modules::logger` - Envelope logging sink
//!
//! ## AMQP Protocol
//! - `amqp::value` - AMQP type system codec
//! - `amqp::frames` - Frame and performative codec
//! - `amqp::message` - Bare message sections
//! - `amqp::client` - Blocking sender client (CLI and tests)
//!
//! ## Operations
//! - `ops::telemetry` - Structured logging setup

// Core infrastructure
pub mod core;

// Broker seam and sink modules
pub mod broker;
pub mod modules;

// AMQP protocol
pub mod amqp;

// Operations
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, runtime};
pub use broker::{Broker, BrokerError, Envelope, PropertyBag};
pub use modules::amqp_server::AmqpServerModule;
pub use modules::mapping::{MappingEntry, MappingTable};
pub use modules::Module;
pub use ops::telemetry;
