//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tally_core::{SessionLimits, TallyError, TallyResult};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds without inbound frames before a connection is dropped. 0 disables.
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            idle_timeout: 0,
        }
    }
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSection {
    /// 0 means unbounded.
    #[serde(default)]
    pub max_line_length: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8022
}
fn default_max_sessions() -> usize {
    100
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub max_sessions: Option<usize>,
    pub idle_timeout: Option<u64>,
    pub max_line_length: Option<usize>,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_sessions: usize,
    pub idle_timeout: Option<u64>,
    pub limits: SessionLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(ConfigFile::default(), CliOverrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides) -> TallyResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse_config(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::merge(file_config, overrides))
    }

    fn merge(file: ConfigFile, cli: CliOverrides) -> Self {
        let idle_timeout = cli.idle_timeout.unwrap_or(file.server.idle_timeout);
        let max_line_length = cli
            .max_line_length
            .unwrap_or(file.session.max_line_length);

        Self {
            bind: cli.bind.unwrap_or(file.server.bind),
            port: cli.port.unwrap_or(file.server.port),
            max_sessions: cli.max_sessions.unwrap_or(file.server.max_sessions),
            idle_timeout: (idle_timeout > 0).then_some(idle_timeout),
            limits: SessionLimits {
                max_line_length: (max_line_length > 0).then_some(max_line_length),
            },
        }
    }

    /// `bind:port` as given to the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_config(content: &str) -> TallyResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| TallyError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 8022);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.max_sessions, 100);
        assert_eq!(cfg.idle_timeout, None);
        assert_eq!(cfg.limits.max_line_length, None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let file = parse_config(
            r#"
[server]
port = 9000

[session]
max_line_length = 4096
"#,
        )
        .unwrap();
        let cfg = ServerConfig::merge(file, CliOverrides::default());
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_sessions, 100);
        assert_eq!(cfg.limits.max_line_length, Some(4096));
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse_config("[server]\nport = 9000\nidle_timeout = 30\n").unwrap();
        let cfg = ServerConfig::merge(
            file,
            CliOverrides {
                port: Some(7000),
                idle_timeout: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.idle_timeout, None);
        assert_eq!(cfg.listen_addr(), "0.0.0.0:7000");
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = parse_config("[server]\nport = \"nope\"\n").unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ServerConfig::load(
            Some(Path::new("/nonexistent/tally/config.toml")),
            CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.port, 8022);
    }
}
