//! Configuration - `~/.config/volpanel/config.yml`
//!
//! ```yaml
//! tool:
//!   python: python3
//!   local_script: volatility3/vol.py
//!   executable: vol
//! ui:
//!   default_verbosity: 1
//!   auto_scroll: true
//!   default_os: linux
//! ```
//!
//! Every key is optional; a missing file means defaults.

use crate::core::Verbosity;
use crate::plugins::TargetOs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_DIR: &str = "volpanel";
const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tool: ToolConfig,
    pub ui: UiConfig,
}

/// How the analysis tool is located and launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Interpreter used for the local script copy
    pub python: String,
    /// Local checkout of the tool, relative to the working directory
    pub local_script: PathBuf,
    /// Installed entry point, resolved via PATH when not a path itself
    pub executable: String,
    /// Overrides symbol cache discovery
    pub symbol_cache: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            python: default_python().to_string(),
            local_script: PathBuf::from("volatility3").join("vol.py"),
            executable: "vol".to_string(),
            symbol_cache: None,
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub default_verbosity: Verbosity,
    pub auto_scroll: bool,
    pub max_log_lines: usize,
    pub default_os: TargetOs,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            default_verbosity: Verbosity::new(1).unwrap_or_default(),
            auto_scroll: true,
            max_log_lines: 10_000,
            default_os: TargetOs::Windows,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from an explicit path, or the default location.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    log::debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tool.executable, "vol");
        assert_eq!(config.tool.local_script, Path::new("volatility3").join("vol.py"));
        assert_eq!(config.ui.default_verbosity.level(), 1);
        assert!(config.ui.auto_scroll);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
tool:
  python: /opt/py/bin/python
ui:
  default_verbosity: 3
  default_os: linux
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.tool.python, "/opt/py/bin/python");
        assert_eq!(config.tool.executable, "vol");
        assert_eq!(config.ui.default_verbosity.level(), 3);
        assert_eq!(config.ui.default_os, TargetOs::Linux);
        assert_eq!(config.ui.max_log_lines, 10_000);
    }

    #[test]
    fn test_rejects_bad_verbosity() {
        let yaml = "ui:\n  default_verbosity: 7\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
