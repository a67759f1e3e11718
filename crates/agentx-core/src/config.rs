//! Configuration loading for the bus, runtime, and logging layers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level AgentX configuration.
///
/// Every section is optional in the file; missing sections fall back to their
/// defaults, so an empty `{}` is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default timeout for correlated `request` calls, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Persist assembled messages through the session repository.
    #[serde(default = "default_true")]
    pub persist_messages: bool,

    /// Re-publish every raw driver event on the bus (stream layer).
    #[serde(default = "default_true")]
    pub forward_stream_events: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            persist_messages: true,
            forward_stream_events: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "agentx_bus=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

/// Replace `${ENV_VAR}` references with their environment values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json5(&raw)
    }

    /// Parse config from JSON5 text, substituting `${ENV_VAR}` references.
    pub fn from_json5(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_json5("{}").unwrap();
        assert_eq!(config.bus.request_timeout_ms, 30_000);
        assert!(config.runtime.persist_messages);
        assert!(config.runtime.forward_stream_events);
        assert_eq!(config.logging.format, "plain");
        assert!(config.logging.level.is_none());
    }

    #[test]
    fn test_json5_overrides() {
        let raw = r#"{
            // comments are allowed
            bus: { request_timeout_ms: 500 },
            runtime: { persist_messages: false },
            logging: { format: "json", level: "debug", filters: ["agentx_bus=trace"] },
        }"#;
        let config = Config::from_json5(raw).unwrap();
        assert_eq!(config.bus.request_timeout(), Duration::from_millis(500));
        assert!(!config.runtime.persist_messages);
        assert!(config.runtime.forward_stream_events);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.filters, vec!["agentx_bus=trace".to_string()]);
    }

    #[test]
    fn test_env_substitution() {
        // SAFETY: test-only env mutation with a unique variable name.
        unsafe { std::env::set_var("AGENTX_TEST_LOG_LEVEL", "warn") };
        let config = Config::from_json5(r#"{ logging: { level: "${AGENTX_TEST_LOG_LEVEL}" } }"#)
            .unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = Config::from_json5("{ bus: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.bus.request_timeout_ms, 30_000);
    }
}
