//! Logging setup shared by the host and the client harness
//!
//! Console output goes to stderr. File output, when enabled, appends to a
//! single log file so a packaged host can collect diagnostics after the
//! helper exits.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Global file logger handle
static FILE_LOGGER: Mutex<Option<File>> = Mutex::new(None);

/// Logging configuration, usually the `[logging]` table of the host config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable console logging
    #[serde(default = "default_true")]
    pub console_enabled: bool,

    /// Enable file logging
    #[serde(default)]
    pub file_enabled: bool,

    /// Log file path
    #[serde(default = "default_log_path")]
    pub file_path: String,

    /// Include timestamps on the console
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include module target
    #[serde(default = "default_true")]
    pub show_target: bool,

    /// Use ANSI colors on the console
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// Log level or `EnvFilter` directive
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "fulltrust-host.log".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: default_log_path(),
            timestamps: true,
            show_target: true,
            ansi_colors: true,
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Verbose console configuration
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.file_enabled = true;
        self.file_path = path.to_string();
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

}

fn file_writer() -> Box<dyn Write + Send> {
    if let Ok(guard) = FILE_LOGGER.lock() {
        if let Some(ref file) = *guard {
            if let Ok(f) = file.try_clone() {
                return Box::new(f);
            }
        }
    }
    Box::new(std::io::sink())
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` overrides the configured level. Only the first call installs a
/// subscriber; later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_enabled = config.file_enabled && !config.file_path.is_empty();
    if file_enabled {
        if let Ok(file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)
        {
            if let Ok(mut guard) = FILE_LOGGER.lock() {
                *guard = Some(file);
            }
        }
    }

    let console_layer = config.console_enabled.then(|| {
        let layer = fmt::layer()
            .with_ansi(config.ansi_colors)
            .with_target(config.show_target)
            .with_writer(std::io::stderr);
        if config.timestamps {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    });

    let file_layer = file_enabled.then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_target(config.show_target)
            .with_writer(file_writer)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert!(config.timestamps);
        assert_eq!(config.level, "info");
        assert_eq!(config.file_path, "fulltrust-host.log");
    }

    #[test]
    fn test_log_config_with_file() {
        let config = LogConfig::default().with_file("bridge.log");
        assert!(config.file_enabled);
        assert_eq!(config.file_path, "bridge.log");
    }

    #[test]
    fn test_debug_and_level_overrides() {
        assert_eq!(LogConfig::debug().level, "debug");
        assert_eq!(LogConfig::default().with_level("warn").level, "warn");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LogConfig = toml::from_str("level = \"trace\"\nfile_enabled = true").unwrap();
        assert_eq!(config.level, "trace");
        assert!(config.file_enabled);
        assert!(config.console_enabled);
        assert_eq!(config.file_path, "fulltrust-host.log");
    }
}
