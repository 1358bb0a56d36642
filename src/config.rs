//! Application configuration, persisted as TOML.
//!
//! Every section carries `#[serde(default)]`, so a partial file only
//! overrides what it names.

use std::path::{Path, PathBuf};

use ragchat_search::{RankingOptions, ResilienceConfig, SearchConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// One search source and the sources that stand in for it when it fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Name of the backend, as reported by the backend itself.
    pub name: String,
    /// Backends tried, in order, when this one fails.
    pub fallbacks: Vec<String>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fan-out and response cache settings.
    pub search: SearchConfig,
    /// Retry, circuit breaker, fallback and health poll settings applied
    /// to every source.
    pub resilience: ResilienceConfig,
    /// Default relevance pipeline options.
    pub ranking: RankingOptions,
    /// Explicit source list. Empty registers every available backend with
    /// no fallbacks.
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/ragchat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("ragchat").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("ragchat")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/ragchat-config/config.toml")
        }
    }

    /// Validate every section and the source list.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] for any invalid value.
    pub fn validate(&self) -> Result<()> {
        let section = |name: &str, result: ragchat_search::Result<()>| {
            result.map_err(|e| AppError::Config(format!("[{name}] {e}")))
        };
        section("search", self.search.validate())?;
        section("resilience", self.resilience.validate())?;
        section("ranking", self.ranking.validate())?;

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::Config("source name must not be empty".into()));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(AppError::Config(format!("source {} listed twice", source.name)));
            }
            if source.fallbacks.iter().any(|f| f == &source.name) {
                return Err(AppError::Config(format!(
                    "source {} lists itself as a fallback",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use ragchat_search::FallbackMode;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.sources.is_empty());
        assert_eq!(config.resilience.fallback.mode, FallbackMode::Graceful);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.search.default_max_results = 7;
        config.resilience.retry.max_retries = 1;
        config.resilience.fallback.mode = FallbackMode::Partial;
        config.ranking.enable_cross_encoder = false;
        config.sources.push(SourceConfig {
            name: "api".into(),
            fallbacks: vec!["memory".into()],
        });

        config.save_to_file(&path).expect("save");
        let loaded = AppConfig::from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[resilience.fallback]\nmode = \"silent\"\n\n[[sources]]\nname = \"database\"\n",
        )
        .expect("write");

        let loaded = AppConfig::from_file(&path).expect("load");
        assert_eq!(loaded.resilience.fallback.mode, FallbackMode::Silent);
        assert_eq!(loaded.resilience.retry.max_retries, 3);
        assert_eq!(loaded.sources[0].name, "database");
        assert!(loaded.sources[0].fallbacks.is_empty());
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = AppConfig::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").expect("write");
        assert!(matches!(AppConfig::from_file(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = AppConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("ragchat"));
    }

    #[test]
    fn invalid_sections_are_named() {
        let mut config = AppConfig::default();
        config.resilience.retry.max_retries = 50;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[resilience]"));
    }

    #[test]
    fn source_list_is_checked() {
        let mut config = AppConfig::default();
        config.sources = vec![
            SourceConfig {
                name: "api".into(),
                fallbacks: vec![],
            },
            SourceConfig {
                name: "api".into(),
                fallbacks: vec![],
            },
        ];
        assert!(config.validate().is_err());

        config.sources = vec![SourceConfig {
            name: "api".into(),
            fallbacks: vec!["api".into()],
        }];
        assert!(config.validate().is_err());
    }
}
