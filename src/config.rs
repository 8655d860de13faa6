//! Configuration management for gitsage
//!
//! Stores settings in ~/.config/gitsage/config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that overrides the configured server URL
pub const SERVER_URL_ENV: &str = "GITSAGE_SERVER_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the explorer API
    pub server_url: String,
    /// Timeout for tree and file requests
    pub request_timeout_secs: u64,
    /// Timeout for chat and explain; model calls are slow
    pub chat_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
            chat_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gitsage"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from the default location with the environment applied
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            config.apply_server_override(&url);
        }
        config
    }

    /// Load config from `path`, or return default.
    ///
    /// A file that fails to parse is moved aside so it is not lost.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                let backup = preserve_corrupt_config(path, &content);
                tracing::warn!(
                    error = %err,
                    backup = %backup.display(),
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to `path`, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config")?;
        Ok(())
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    /// Replace the server URL; blank values are ignored
    pub fn apply_server_override(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            self.server_url = url.to_string();
        }
    }

    /// Validated base URL for the backend
    pub fn server_base(&self) -> Result<Url> {
        let url = Url::parse(&self.server_url)
            .with_context(|| format!("Invalid server URL '{}'", self.server_url))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => anyhow::bail!("Unsupported server URL scheme '{}'", other),
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/gitsage/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let corrupt_path = path.with_extension(format!("json.corrupt-{}", stamp));
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
    corrupt_path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://127.0.0.1:8000");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.chat_timeout_secs, 120);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            server_url: "https://explorer.example.com".into(),
            request_timeout_secs: 5,
            chat_timeout_secs: 60,
        };

        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server_url": "http://localhost:9000"}"#).unwrap();

        let config = Config::load_from(&path);

        assert_eq!(config.server_url, "http://localhost:9000");
        assert_eq!(config.chat_timeout_secs, 120);
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = Config::load_from(&path);

        assert_eq!(config, Config::default());
        assert!(!path.exists());
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("config.json.corrupt-")
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(backups[0].path()).unwrap(), "{not json");
    }

    #[test]
    fn test_server_base_validation() {
        let mut config = Config::default();
        assert!(config.server_base().is_ok());

        config.apply_server_override("  ");
        assert_eq!(config.server_url, "http://127.0.0.1:8000");

        config.apply_server_override("ftp://example.com");
        assert!(config.server_base().is_err());

        config.apply_server_override("not a url");
        assert!(config.server_base().is_err());
    }
}
