//! Gateway module contract and the modules shipped with the binary.
//!
//! A module is created with a broker handle plus its own configuration,
//! receives envelopes the broker routes to it, and is destroyed by drop
//! (lifecycle-owning modules expose an explicit `shutdown` too).

pub mod amqp_server;
pub mod logger;
pub mod mapping;

use crate::broker::Envelope;

/// Host-facing surface of a pluggable gateway module.
pub trait Module: Send + Sync {
    /// Stable module name for logs and diagnostics.
    fn name(&self) -> &str;

    /// An envelope routed from the broker toward this module.
    ///
    /// Ingress-only modules implement this as a no-op.
    fn receive(&self, envelope: &Envelope);
}
