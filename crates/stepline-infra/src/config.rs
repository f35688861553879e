//! Global configuration loader for Stepline.
//!
//! Reads `config.toml` from the data directory (`~/.stepline/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepline_types::config::GlobalConfig;

/// Resolve the data directory.
///
/// Uses `STEPLINE_DATA_DIR` if set, otherwise `~/.stepline`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STEPLINE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".stepline");
    }

    // Last resort: current directory
    PathBuf::from(".stepline")
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.engine.max_in_flight, 10_000);
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[server]
port = 9100
require_auth = true

[engine]
step_timeout_secs = 5

[example]
sleep_secs = 2
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.port, 9100);
        assert!(config.server.require_auth);
        assert_eq!(config.engine.step_timeout_secs, 5);
        assert_eq!(config.engine.max_concurrent_steps, 64);
        assert_eq!(config.example.sleep_secs, 2);
        assert_eq!(config.example.user_id, 1);
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.port, 8787);
        assert!(!config.server.require_auth);
    }

    #[test]
    fn resolve_data_dir_ends_with_stepline() {
        // STEPLINE_DATA_DIR is not set in the test environment.
        if std::env::var("STEPLINE_DATA_DIR").is_err() {
            let dir = resolve_data_dir();
            assert!(dir.ends_with(".stepline"));
        }
    }
}
