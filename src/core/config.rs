//! Gateway configuration parsing and validation.

use crate::modules::amqp_server::DEFAULT_AMQP_PORT;
use crate::modules::mapping::MappingEntry;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Top-level configuration for the portico gateway.
///
/// ```json
/// {
///   "listener": { "bind": "0.0.0.0:5672" },
///   "mappings": [
///     { "endpoint": "telemetry/ward-7", "deviceId": "dev1", "deviceKey": "key1" }
///   ],
///   "log_level": "info"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    pub mappings: Vec<MappingEntry>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_AMQP_PORT)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Field-level validation. Duplicate endpoints are allowed; lookup
    /// resolves them to the first occurrence.
    pub fn validate(&self) -> Result<()> {
        for (index, entry) in self.mappings.iter().enumerate() {
            if entry.endpoint.is_empty() {
                anyhow::bail!("mappings[{index}]: endpoint is empty");
            }
            if entry.device_id.is_empty() {
                anyhow::bail!("mappings[{index}]: deviceId is empty");
            }
            if entry.device_key.is_empty() {
                anyhow::bail!("mappings[{index}]: deviceKey is empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "mappings": [ { "endpoint": "E", "deviceId": "d", "deviceKey": "k" } ] }"#,
        )
        .expect("parse");
        assert_eq!(config.listener.bind.port(), DEFAULT_AMQP_PORT);
        assert_eq!(config.mappings.len(), 1);
        assert!(config.validate().is_ok());
        assert!(config.log_level.is_none());
    }

    #[test]
    fn explicit_bind_overrides_default() {
        let config: Config = serde_json::from_str(
            r#"{ "listener": { "bind": "127.0.0.1:15672" }, "mappings": [] }"#,
        )
        .expect("parse");
        assert_eq!(config.listener.bind.to_string(), "127.0.0.1:15672");
    }

    #[test]
    fn empty_identity_field_fails_validation() {
        let config: Config = serde_json::from_str(
            r#"{ "mappings": [ { "endpoint": "E", "deviceId": "", "deviceKey": "k" } ] }"#,
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }
}
