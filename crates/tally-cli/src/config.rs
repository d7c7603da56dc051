//! Client configuration at `~/.tally/client.toml`.
//!
//! Provides the default host and port. CLI flags always override config
//! file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Default connection settings.
    #[serde(default)]
    pub default: DefaultConfig,
}

/// Default connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8022
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default.host, "127.0.0.1");
        assert_eq!(cfg.default.port, 8022);
    }

    #[test]
    fn parse_partial_toml_config() {
        let cfg: Config = toml::from_str("[default]\nhost = \"sums.example.com\"\n").unwrap();
        assert_eq!(cfg.default.host, "sums.example.com");
        assert_eq!(cfg.default.port, 8022); // default
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/tally/client.toml")).unwrap();
        assert_eq!(cfg.default.port, 8022);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "[default]\nport = \"x\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
