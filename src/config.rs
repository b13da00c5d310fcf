use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::crawler::ScanOptions;
use crate::error::{Error, Result};

pub const APP_NAME: &str = "diskmap";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration, loaded from TOML. Every field has a default so a
/// partial (or absent) file is fine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Largest children drawn per treemap.
    pub max_items: usize,
    /// Rows shown in the extension breakdown.
    pub max_extensions: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_items: 12,
            max_extensions: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub skip_hidden: bool,
    /// Entry names that are never descended into or counted (exact match).
    pub skip_patterns: Vec<String>,
    /// Depth below the root after which directories stay unscanned placeholders.
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    pub level: String,
    /// Log destination for the TUI; the report binary always logs to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load from an explicit path, or from the platform config directory if
    /// a file exists there, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            skip_hidden: self.scan.skip_hidden,
            skip_patterns: self.scan.skip_patterns.clone(),
            max_depth: self.scan.max_depth,
        }
    }
}

pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.display.max_items, 12);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::parse(
            r#"
            [display]
            max_items = 20

            [scan]
            skip_patterns = ["node_modules", ".git"]
            max_depth = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.display.max_items, 20);
        assert_eq!(config.display.max_extensions, 8);
        assert_eq!(config.scan.max_depth, Some(3));
        assert!(!config.scan.skip_hidden);

        let options = config.scan_options();
        assert_eq!(options.skip_patterns, vec!["node_modules", ".git"]);
        assert_eq!(options.max_depth, Some(3));
    }

    #[test]
    fn test_from_file_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\nmax_items = \"lots\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }
}
