//! Logging setup
//!
//! The engine reports through `tracing` macros only: `info!` for build, save,
//! load and reset, `debug!` per step, `warn!` for rejected records and
//! `trace!` for window deltas. Applications embedding the engine install
//! whatever subscriber they like; [`init_logging`] is a ready-made fmt
//! subscriber for tools and tests.
//!
//! ```rust,no_run
//! use streamaggr::telemetry::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::new("streamaggr=debug").with_target(false)).unwrap();
//! ```

use crate::error::{ProcessorError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_filter() -> String {
    "streamaggr=info".to_string()
}

fn default_true() -> bool {
    true
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is not set
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Include the event target (module path)
    #[serde(default = "default_true")]
    pub with_target: bool,

    /// Include source file and line
    #[serde(default)]
    pub with_file: bool,

    /// Use the compact line format
    #[serde(default)]
    pub compact: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            with_target: true,
            with_file: false,
            compact: false,
        }
    }
}

impl LogConfig {
    /// Creates a configuration with the given default filter
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Include file and line number in every event
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn compact(mut self, enabled: bool) -> Self {
        self.compact = enabled;
        self
    }

    /// Filter from `RUST_LOG`, falling back to the configured directives
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder().parse_lossy(
            std::env::var("RUST_LOG").unwrap_or_else(|_| self.filter.clone()),
        )
    }
}

/// Install a global fmt subscriber
///
/// Fails when a global subscriber is already set.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target)
        .with_file(config.with_file)
        .with_line_number(config.with_file);

    let installed = if config.compact {
        builder.compact().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProcessorError::Configuration { source: e })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "streamaggr=info");
        assert!(config.with_target);
        assert!(!config.with_file);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("streamaggr=trace")
            .with_target(false)
            .with_file(true)
            .compact(true);
        assert_eq!(config.filter, "streamaggr=trace");
        assert!(!config.with_target);
        assert!(config.with_file);
        assert!(config.compact);
    }

    #[test]
    fn test_log_config_from_json_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"filter": "warn"}"#).unwrap();
        assert_eq!(config.filter, "warn");
        assert!(config.with_target);
    }

    #[test]
    fn test_init_logging_twice_fails() {
        let _ = init_logging(LogConfig::default());
        assert!(init_logging(LogConfig::default()).is_err());
    }
}
