//! Broker contract consumed by gateway modules.
//!
//! Modules publish [`Envelope`]s to a [`Broker`]; delivery semantics beyond
//! acceptance of the publish call belong to the broker implementation.

pub mod local;

use bytes::Bytes;
use thiserror::Error;

pub use local::LocalBroker;

/// Property every gateway envelope carries naming the producing module class.
pub const SOURCE_PROPERTY: &str = "source";
/// Device identity properties stamped by ingress modules.
pub const DEVICE_ID_PROPERTY: &str = "deviceid";
pub const DEVICE_KEY_PROPERTY: &str = "devicekey";
/// `SOURCE_PROPERTY` value for endpoint-mapped ingress.
pub const SOURCE_MAPPING: &str = "mapping";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is shut down")]
    Closed,
    #[error("delivery to module '{0}' failed")]
    Delivery(String),
}

/// Ordered string property bag with first-write-wins semantics.
///
/// Insertion order is the protection mechanism: identity properties written
/// first can never be overwritten by a colliding application property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: Vec<(String, String)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is already present. Returns whether it was kept.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.entries.iter().any(|(k, _)| *k == key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One message handed to the broker. Ownership transfers into `publish`;
/// the broker never retains the instance beyond the call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub properties: PropertyBag,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(properties: PropertyBag, payload: Bytes) -> Self {
        Self {
            properties,
            payload,
        }
    }
}

/// Publish seam between modules and the hosting broker.
///
/// `publish` is called synchronously from module worker threads and is
/// expected to be fast; a slow implementation stalls the calling module's
/// entire polling loop.
pub trait Broker: Send + Sync {
    fn publish(&self, envelope: Envelope) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bag_first_write_wins() {
        let mut bag = PropertyBag::new();
        assert!(bag.insert(DEVICE_ID_PROPERTY, "dev1"));
        assert!(!bag.insert(DEVICE_ID_PROPERTY, "imposter"));
        assert_eq!(bag.get(DEVICE_ID_PROPERTY), Some("dev1"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn property_bag_keeps_insertion_order() {
        let mut bag = PropertyBag::new();
        bag.insert("b", "2");
        bag.insert("a", "1");
        let keys: Vec<_> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
