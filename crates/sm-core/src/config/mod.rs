//! Configuration management for shellmux

mod mux;
pub mod serde_utils;

pub use mux::{
    ListenerConfig, LogConfig, MuxConfig, PtyUpgradeConfig, StreamConfig, DEFAULT_HISTORY_LEN,
    DEFAULT_PENDING_OUTPUT_CAP,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellmux")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let result = load_config::<MuxConfig>(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = MuxConfig::default();
        config.pending_output_cap = 4096;
        config.listeners.push(ListenerConfig {
            host: "0.0.0.0".to_string(),
            port: 4444,
            autostart: false,
        });
        save_config(&path, &config).unwrap();

        let loaded: MuxConfig = load_config(&path).unwrap();
        assert_eq!(loaded.pending_output_cap, 4096);
        assert_eq!(loaded.listeners.len(), 2);
        assert_eq!(loaded.listeners[1].port, 4444);
        assert!(!loaded.listeners[1].autostart);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "pending_output_cap = \"lots\"").unwrap();
        assert!(matches!(
            load_config::<MuxConfig>(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
