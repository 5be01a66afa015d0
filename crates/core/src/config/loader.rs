//! Configuration file loader for the supervisor home directory.
//!
//! The only file read is `<home>/config.toml`. A missing file is not an
//! error: the defaults from `SupervisorSettings` apply.

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use mf_protocol::config_models::SupervisorSettings;
use std::path::Path;

/// Name of the settings file inside the home directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Loads the supervisor configuration rooted at `home`.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - `config.toml` exists but cannot be read
/// - `config.toml` is not valid TOML or has mistyped keys
/// - the settings cannot drive the supervisor (no dependencies, zero
///   intervals or timeouts)
pub async fn load_config(home: &Path) -> ConfigResult<AppConfig> {
    let config_path = home.join(CONFIG_FILE);

    if !tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        return Ok(AppConfig::with_defaults(home));
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let settings: SupervisorSettings =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    validate(&settings).map_err(|reason| ConfigError::InvalidConfig {
        path: config_path,
        reason,
    })?;

    Ok(AppConfig::new(home, settings))
}

fn validate(settings: &SupervisorSettings) -> Result<(), String> {
    if settings.dependencies.iter().all(|d| d.trim().is_empty()) {
        return Err("dependencies must name at least one package".to_string());
    }
    if settings.uv.trim().is_empty() {
        return Err("uv must not be empty".to_string());
    }

    let timings = [
        ("poll-interval-ms", settings.poll_interval_ms),
        ("request-timeout-ms", settings.request_timeout_ms),
        ("startup-timeout-ms", settings.startup_timeout_ms),
        ("shutdown-grace-ms", settings.shutdown_grace_ms),
    ];
    if let Some((key, _)) = timings.iter().find(|(_, value)| *value == 0) {
        return Err(format!("{key} must be greater than zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");

        let config = load_config(dir.path())
            .await
            .expect("Should handle missing config.toml");

        assert_eq!(config.settings, SupervisorSettings::default());
        assert_eq!(config.home, dir.path());
    }

    #[tokio::test]
    async fn test_load_config_reads_settings() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
env-dir = "runtime"
dependencies = ["mathformer"]
poll-interval-ms = 100
"#,
        )
        .expect("Failed to write config.toml");

        let config = load_config(dir.path()).await.expect("Failed to load config");

        assert_eq!(config.env_dir(), dir.path().join("runtime"));
        assert_eq!(config.settings.dependencies, vec!["mathformer"]);
        assert_eq!(config.poll_interval().as_millis(), 100);
    }

    #[tokio::test]
    async fn test_load_config_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(CONFIG_FILE), "env-dir = [invalid toml")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::TomlParse { path, .. }) = result {
            assert!(path.ends_with("config.toml"));
        } else {
            panic!("Expected TomlParse error");
        }
    }

    #[tokio::test]
    async fn test_load_config_wrong_type() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(CONFIG_FILE), "poll-interval-ms = \"fast\"")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;
        assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
    }

    #[tokio::test]
    async fn test_load_config_rejects_empty_dependencies() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(CONFIG_FILE), "dependencies = []")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::InvalidConfig { reason, .. }) = result {
            assert!(reason.contains("dependencies"));
        } else {
            panic!("Expected InvalidConfig error");
        }
    }

    #[tokio::test]
    async fn test_load_config_rejects_zero_timeout() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(CONFIG_FILE), "request-timeout-ms = 0")
            .expect("Failed to write config.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::InvalidConfig { reason, .. }) = result {
            assert!(reason.contains("request-timeout-ms"));
        } else {
            panic!("Expected InvalidConfig error");
        }
    }
}
