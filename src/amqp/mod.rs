//! Minimal AMQP 1.0 protocol support: type codec, framing, message sections,
//! and a small blocking sender client for tooling and tests.

pub mod client;
pub mod frames;
pub mod message;
pub mod value;
