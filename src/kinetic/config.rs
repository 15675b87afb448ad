// SPDX-License-Identifier: MIT

//! Monitor configuration
//!
//! Defaults, then an optional YAML file, then environment overrides.

use crate::kinetic::error::MonitorError;
use crate::kinetic::graph::LayoutOptions;
use crate::kinetic::run::EngineConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

pub const CONFIG_ENV: &str = "KINETIC_MONITOR_CONFIG";
pub const PORT_ENV: &str = "KINETIC_MONITOR_PORT";
pub const MAX_BUFFERED_ENV: &str = "KINETIC_MONITOR_MAX_BUFFERED";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub layout: LayoutOptions,
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

impl MonitorConfig {
    /// Load from `path`, or from `KINETIC_MONITOR_CONFIG` when no path is
    /// given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, MonitorError> {
        let from_env = env::var(CONFIG_ENV).ok();
        let path = path.or(from_env.as_deref().map(Path::new));

        let mut config = match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                Self::from_yaml(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, MonitorError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| MonitorError::config(format!("{} must be a port, got '{}'", PORT_ENV, port)))?;
        }
        if let Some(max) = lookup(MAX_BUFFERED_ENV) {
            self.engine.max_buffered_events = max.trim().parse().map_err(|_| {
                MonitorError::config(format!("{} must be a count, got '{}'", MAX_BUFFERED_ENV, max))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.server.port, 3030);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.max_buffered_events, 1024);
        assert_eq!(config.engine.snapshot_grace_events, 64);
        assert!(config.engine.stamp_untimed_events);
        assert_eq!(config.layout.node_width, 180.0);
    }

    #[test]
    fn test_partial_yaml() {
        let config = MonitorConfig::from_yaml(
            r#"
layout:
  rank_gap: 120
server:
  port: 8080
"#,
        )
        .unwrap();
        assert_eq!(config.layout.rank_gap, 120.0);
        assert_eq!(config.layout.node_gap, 40.0);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(MonitorConfig::from_yaml("  \n").unwrap(), MonitorConfig::default());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(PORT_ENV, "9000"), (MAX_BUFFERED_ENV, "16")]);
        let mut config = MonitorConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.max_buffered_events, 16);
    }

    #[test]
    fn test_bad_override() {
        let mut config = MonitorConfig::default();
        let err = config
            .apply_overrides(|key| (key == PORT_ENV).then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }
}
