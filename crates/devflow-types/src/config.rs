//! Engine configuration types for devflow.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! step defaults, run timeouts and the host API listener.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the devflow engine.
///
/// Loaded from `~/.devflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding workflow YAML files, relative to the data dir.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,

    /// Delay between step attempts when a step does not set `retry_delay_ms`.
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,

    /// Shell step timeout when the step does not set one.
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    /// HTTP step timeout when the step does not set one.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Global run timeout applied to workflows without their own `timeout_secs`.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Broadcast capacity of the engine event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Step outputs larger than this (serialized JSON) are truncated.
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: usize,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_workflows_dir() -> String {
    "workflows".to_string()
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_shell_timeout_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_step_output_bytes() -> usize {
    1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            default_retry_delay_ms: default_retry_delay_ms(),
            shell_timeout_secs: default_shell_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            run_timeout_secs: None,
            event_capacity: default_event_capacity(),
            max_step_output_bytes: default_max_step_output_bytes(),
            server: ServerConfig::default(),
        }
    }
}

/// Listener settings for `devflow serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7676
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.workflows_dir, "workflows");
        assert_eq!(config.default_retry_delay_ms, 5_000);
        assert_eq!(config.shell_timeout_secs, 300);
        assert_eq!(config.run_timeout_secs, None);
        assert_eq!(config.server.port, 7676);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
workflows_dir = "flows"
default_retry_delay_ms = 250
run_timeout_secs = 900

[server]
port = 9000
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workflows_dir, "flows");
        assert_eq!(config.default_retry_delay_ms, 250);
        assert_eq!(config.run_timeout_secs, Some(900));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.http_timeout_secs, 30);
    }
}
