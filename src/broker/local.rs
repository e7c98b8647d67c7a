//! Minimal in-process broker used by the gateway binary.
//!
//! Fan-out and subscription routing are out of scope; every published
//! envelope is handed to each registered sink module in registration order.

use crate::broker::{Broker, BrokerError, Envelope};
use crate::modules::Module;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default, Clone)]
pub struct LocalBroker {
    sinks: Arc<Mutex<Vec<Arc<dyn Module>>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module that receives every published envelope.
    pub fn attach_sink(&self, module: Arc<dyn Module>) {
        self.sinks
            .lock()
            .expect("broker sink registry poisoned")
            .push(module);
    }
}

impl Broker for LocalBroker {
    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let sinks = self
            .sinks
            .lock()
            .map_err(|_| BrokerError::Closed)?
            .clone();
        debug!(
            properties = envelope.properties.len(),
            payload_bytes = envelope.payload.len(),
            sinks = sinks.len(),
            "publishing envelope"
        );
        for sink in &sinks {
            sink.receive(&envelope);
        }
        Ok(())
    }
}
