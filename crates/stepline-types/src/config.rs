//! Global configuration types for Stepline.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! HTTP listener, engine limits and the bundled example workflow.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stepline/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub example: ExampleConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Reject workflow requests that carry no valid API key.
    #[serde(default)]
    pub require_auth: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            require_auth: false,
        }
    }
}

/// Durable engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of non-terminal instances admitted at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Maximum number of compute steps running at once.
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Timeout applied to compute steps without their own timeout.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_max_in_flight() -> usize {
    10_000
}

fn default_max_concurrent_steps() -> usize {
    64
}

fn default_step_timeout_secs() -> u64 {
    30
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_concurrent_steps: default_max_concurrent_steps(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

/// Parameters of the bundled `ExampleWorkflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleConfig {
    /// Length of the durable sleep step.
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,

    /// User fetched by the final step.
    #[serde(default = "default_user_id")]
    pub user_id: i64,
}

fn default_sleep_secs() -> u64 {
    60
}

fn default_user_id() -> i64 {
    1
}

impl Default for ExampleConfig {
    fn default() -> Self {
        Self {
            sleep_secs: default_sleep_secs(),
            user_id: default_user_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8787);
        assert!(!config.server.require_auth);
        assert_eq!(config.engine.max_concurrent_steps, 64);
        assert_eq!(config.engine.step_timeout_secs, 30);
        assert_eq!(config.example.sleep_secs, 60);
        assert_eq!(config.example.user_id, 1);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.engine.max_in_flight, 10_000);
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
[server]
port = 9000
require_auth = true

[engine]
step_timeout_secs = 5

[example]
sleep_secs = 2
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.require_auth);
        assert_eq!(config.engine.step_timeout_secs, 5);
        assert_eq!(config.engine.max_concurrent_steps, 64);
        assert_eq!(config.example.sleep_secs, 2);
        assert_eq!(config.example.user_id, 1);
    }
}
