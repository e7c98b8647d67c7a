//! Endpoint-to-device mapping table.
//!
//! Built once from configuration, read-only afterwards. Lookup is a linear
//! scan with first-match-wins on duplicate endpoints; tables are expected to
//! hold tens of entries.

use anyhow::{bail, Result};
use serde::Deserialize;

/// One configured endpoint mapping.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MappingEntry {
    pub endpoint: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "deviceKey")]
    pub device_key: String,
}

/// Identity a matched link inherits from its endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_key: String,
}

#[derive(Debug, Clone)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
}

impl MappingTable {
    /// Build the table, validating every entry up front. Any invalid entry
    /// fails the whole build; no partial table is produced.
    pub fn build(entries: Vec<MappingEntry>) -> Result<Self> {
        for (index, entry) in entries.iter().enumerate() {
            if entry.endpoint.is_empty() {
                bail!("mapping entry {index}: endpoint is empty");
            }
            if entry.device_id.is_empty() {
                bail!("mapping entry {index}: deviceId is empty");
            }
            if entry.device_key.is_empty() {
                bail!("mapping entry {index}: deviceKey is empty");
            }
        }
        Ok(Self { entries })
    }

    /// First entry whose endpoint matches, in input order.
    pub fn lookup(&self, endpoint: &str) -> Option<DeviceIdentity> {
        self.entries
            .iter()
            .find(|entry| entry.endpoint == endpoint)
            .map(|entry| DeviceIdentity {
                device_id: entry.device_id.clone(),
                device_key: entry.device_key.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(endpoint: &str, id: &str, key: &str) -> MappingEntry {
        MappingEntry {
            endpoint: endpoint.into(),
            device_id: id.into(),
            device_key: key.into(),
        }
    }

    #[test]
    fn duplicate_endpoints_resolve_to_first() {
        let table = MappingTable::build(vec![
            entry("A", "d1", "k1"),
            entry("A", "d2", "k2"),
        ])
        .expect("build");
        let identity = table.lookup("A").expect("match");
        assert_eq!(identity.device_id, "d1");
        assert_eq!(identity.device_key, "k1");
    }

    #[test]
    fn miss_returns_none() {
        let table = MappingTable::build(vec![entry("A", "d1", "k1")]).expect("build");
        assert!(table.lookup("B").is_none());
    }

    #[test]
    fn empty_field_fails_whole_build() {
        assert!(MappingTable::build(vec![
            entry("A", "d1", "k1"),
            entry("B", "", "k2"),
        ])
        .is_err());
    }

    #[test]
    fn empty_table_is_allowed() {
        let table = MappingTable::build(Vec::new()).expect("build");
        assert!(table.is_empty());
        assert!(table.lookup("anything").is_none());
    }
}
