//! Logger sink module.
//!
//! Writes one structured log line per received envelope. Doubles as the demo
//! egress sink wired up by `portico start`.

use crate::broker::{Envelope, DEVICE_ID_PROPERTY, SOURCE_PROPERTY};
use crate::modules::Module;
use tracing::info;

#[derive(Debug, Default)]
pub struct LoggerModule;

impl LoggerModule {
    pub fn new() -> Self {
        Self
    }
}

impl Module for LoggerModule {
    fn name(&self) -> &str {
        "logger"
    }

    fn receive(&self, envelope: &Envelope) {
        let properties: Vec<String> = envelope
            .properties
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        info!(
            source = envelope.properties.get(SOURCE_PROPERTY).unwrap_or("?"),
            device = envelope.properties.get(DEVICE_ID_PROPERTY).unwrap_or("?"),
            payload_bytes = envelope.payload.len(),
            properties = properties.join(","),
            "envelope received"
        );
    }
}
