//! Host configuration
//!
//! Loaded from an optional TOML file; command-line flags override it.

use fulltrust_common::{Error, LogConfig, Result, DEFAULT_PIPE_NAME, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Pipe name the host listens on
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    /// Protocol version clients are expected to speak; others are served but logged
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    /// Upper bound on the remote `LoadLibraryW` thread, in milliseconds
    #[serde(default = "default_inject_timeout_ms")]
    pub inject_timeout_ms: u64,
    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_pipe_name() -> String {
    DEFAULT_PIPE_NAME.to_string()
}

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

fn default_inject_timeout_ms() -> u64 {
    10_000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pipe_name: default_pipe_name(),
            protocol_version: default_protocol_version(),
            inject_timeout_ms: default_inject_timeout_ms(),
            logging: LogConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipe_name.trim().is_empty() {
            return Err(Error::Config("pipe_name must not be empty".into()));
        }
        if self.pipe_name.contains(['\\', '/']) {
            return Err(Error::Config(format!(
                "pipe_name must be a bare name, got {}",
                self.pipe_name
            )));
        }
        if self.inject_timeout_ms == 0 {
            return Err(Error::Config("inject_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn inject_timeout(&self) -> Duration {
        Duration::from_millis(self.inject_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.pipe_name, DEFAULT_PIPE_NAME);
        assert_eq!(config.protocol_version, 1);
        assert_eq!(config.inject_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            pipe_name = "bridge-test"
            inject_timeout_ms = 30000

            [logging]
            level = "debug"
            file_enabled = true
            file_path = "host.log"
        "#;
        let config = HostConfig::from_toml(toml).unwrap();
        assert_eq!(config.pipe_name, "bridge-test");
        assert_eq!(config.protocol_version, 1);
        assert_eq!(config.inject_timeout_ms, 30000);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file_enabled);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(HostConfig::from_toml("").unwrap(), HostConfig::default());
    }

    #[test]
    fn test_rejects_path_like_pipe_name() {
        let err = HostConfig::from_toml(r#"pipe_name = '\\.\pipe\x'"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(HostConfig::from_toml("inject_timeout_ms = 0").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = HostConfig::from_file("definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
