//! Connection configuration and the TOML file that carries it.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::Map;

/// Name used for a connection registered without one.
pub const DEFAULT: &str = "default";

/// One logical connection: which driver opens it, how messages on it are
/// encoded, and how much of the event-name keyspace it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct Config {
    #[builder(default = String::from(crate::drivers::MEMORY), setter(into))]
    pub driver: String,
    #[builder(default = String::from(crate::codec::JSON), setter(into))]
    pub codec: String,
    /// Hash-ring weight. Zero is treated as one; start refuses anything above
    /// [`crate::hashring::MAX_WEIGHT`].
    #[builder(default = 1)]
    pub weight: u32,
    /// Stripped from inbound names, prepended to outbound ones.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Opaque driver options.
    #[builder(default)]
    pub setting: Map,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Bus-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSettings {
    /// This node's role. Resolves the group of events declared with `grouping`.
    pub role: String,
    /// Default cap on concurrent executions per event. Unbounded when absent.
    pub concurrency: Option<usize>,
}

/// Event subscriptions declared in the config file. The node binary binds
/// these to a logging action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventEntry {
    pub alias: Vec<String>,
    pub connect: String,
    pub group: String,
    pub grouping: bool,
    pub concurrency: Option<usize>,
}

/// TOML-backed bus configuration.
///
/// ```toml
/// [bus]
/// role = "payments"
/// concurrency = 32
///
/// [connections.primary]
/// driver = "memory"
/// weight = 3
/// prefix = "prod."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub bus: BusSettings,
    pub connections: HashMap<String, Config>,
    pub events: HashMap<String, EventEntry>,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<BusConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<BusConfig> {
    let config: BusConfig = toml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.driver, "memory");
        assert_eq!(config.codec, "json");
        assert_eq!(config.weight, 1);
        assert!(config.prefix.is_empty());
        assert!(config.setting.is_empty());
    }

    #[test]
    fn builder_overrides() {
        let config = Config::builder().weight(3).prefix("prod.").build();
        assert_eq!(config.weight, 3);
        assert_eq!(config.prefix, "prod.");
        assert_eq!(config.driver, "memory");
    }

    #[test]
    fn parses_full_file() {
        let config = parse_config(
            r#"
            [bus]
            role = "payments"
            concurrency = 8

            [connections.a]
            weight = 1

            [connections.b]
            weight = 3
            prefix = "prod."
            [connections.b.setting]
            url = "nats://localhost:4222"

            [events."pay.finish"]
            alias = ["pay.done"]
            grouping = true
            "#,
        )
        .unwrap();

        assert_eq!(config.bus.role, "payments");
        assert_eq!(config.bus.concurrency, Some(8));
        assert_eq!(config.connections["a"].weight, 1);
        assert_eq!(config.connections["a"].codec, "json");
        assert_eq!(config.connections["b"].prefix, "prod.");
        assert_eq!(
            config.connections["b"].setting["url"],
            serde_json::json!("nats://localhost:4222")
        );
        assert_eq!(config.events["pay.finish"].alias, vec!["pay.done"]);
        assert!(config.events["pay.finish"].grouping);
    }

    #[test]
    fn empty_file_is_default() {
        let config = parse_config("").unwrap();
        assert!(config.connections.is_empty());
        assert_eq!(config.bus, BusSettings::default());
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(parse_config("[buss]\nrole = 'x'").is_err());
    }
}
