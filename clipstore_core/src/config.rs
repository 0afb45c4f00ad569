//! Configuration for the storage node and router binaries
//!
//! Structured configuration with serde, loadable from TOML files. Every
//! field has a default so partial files work.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for a single storage node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageNodeConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory the node persists files under.
    pub base_dir: PathBuf,
}

impl Default for StorageNodeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8090,
            base_dir: PathBuf::from("./storage"),
        }
    }
}

impl StorageNodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Configuration for the content router and its admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Admin RPC bind host.
    pub admin_host: String,
    /// Admin RPC bind port.
    pub admin_port: u16,
    /// Initial storage node addresses (host:port).
    pub nodes: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            admin_host: "localhost".to_string(),
            admin_port: 8081,
            nodes: Vec::new(),
        }
    }
}

impl RouterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_defaults() {
        let config = StorageNodeConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8090);
    }

    #[test]
    fn test_storage_partial_toml_uses_defaults() {
        let config: StorageNodeConfig = toml::from_str("port = 9001").unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn test_router_round_trip() {
        let config = RouterConfig {
            admin_host: "0.0.0.0".to_string(),
            admin_port: 7000,
            nodes: vec!["n1:9001".to_string(), "n2:9002".to_string()],
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: RouterConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.admin_port, 7000);
        assert_eq!(parsed.nodes.len(), 2);
    }
}
