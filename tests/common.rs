//! Common test harness utilities for integration tests.
//!
//! Provides a recording broker sink and helpers for spawning the AMQP
//! ingress module on an ephemeral port.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use portico::broker::{Broker, BrokerError, Envelope};
use portico::modules::amqp_server::AmqpServerModule;
use portico::modules::mapping::MappingEntry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Broker double that records every published envelope.
#[derive(Default)]
pub struct RecordingBroker {
    envelopes: Mutex<Vec<Envelope>>,
    fail_next: Mutex<bool>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().expect("broker lock").clone()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().expect("broker lock").len()
    }

    /// Make the next publish fail with a delivery error.
    pub fn fail_next(&self) {
        *self.fail_next.lock().expect("broker lock") = true;
    }
}

impl Broker for RecordingBroker {
    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut fail = self.fail_next.lock().expect("broker lock");
        if *fail {
            *fail = false;
            return Err(BrokerError::Delivery("injected failure".to_string()));
        }
        self.envelopes.lock().expect("broker lock").push(envelope);
        Ok(())
    }
}

pub fn mapping(endpoint: &str, device_id: &str, device_key: &str) -> MappingEntry {
    MappingEntry {
        endpoint: endpoint.to_string(),
        device_id: device_id.to_string(),
        device_key: device_key.to_string(),
    }
}

/// Spawn the ingress module on 127.0.0.1:0 with the given mappings.
pub fn spawn_server(
    broker: Arc<RecordingBroker>,
    mappings: Vec<MappingEntry>,
) -> AmqpServerModule {
    AmqpServerModule::spawn(broker, "127.0.0.1:0".parse().expect("addr"), mappings)
        .expect("spawn amqp server")
}

/// Poll until `check` returns true or the deadline passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
