//! Configuration via `docket.toml`
//!
//! A config file in the data directory controls how stores are opened. On
//! first start a default `docket.toml` is created. To change settings,
//! edit the file and restart.

use serde::{Deserialize, Serialize};
use std::path::Path;

use docket_core::{Error, Result};

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "docket.toml";

/// Storage medium for every store's database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// One JSON file per store in the data directory
    Json,
    /// In memory; nothing survives the process
    Transient,
}

/// Configuration loaded from `docket.toml`.
///
/// # Example
///
/// ```toml
/// backend = "json"
/// log_level = "info"
/// migrate = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocketConfig {
    /// Storage backend: `"json"` or `"transient"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Permit schema migrations on open without passing `--migrate`.
    #[serde(default)]
    pub migrate: bool,
}

fn default_backend() -> String {
    "json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            log_level: default_log_level(),
            migrate: false,
        }
    }
}

impl DocketConfig {
    /// Parse the backend string.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the string is not `"json"` or `"transient"`.
    pub fn backend(&self) -> Result<Backend> {
        match self.backend.as_str() {
            "json" => Ok(Backend::Json),
            "transient" => Ok(Backend::Transient),
            other => Err(Error::Config(format!(
                "Invalid backend '{}' in {}. Expected \"json\" or \"transient\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Docket configuration
#
# Storage backend: "json" (default) or "transient"
#   "json"      = one JSON file per store in the data directory
#   "transient" = in memory only, lost on exit
backend = "json"

# Log filter used when RUST_LOG is not set (default: "info")
log_level = "info"

# Allow schema migrations when a store opens (default: false).
# Equivalent to always passing --migrate.
migrate = false
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read, parsed, or names
    /// an unknown backend.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: DocketConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.backend()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_json() {
        let config = DocketConfig::default();
        assert_eq!(config.backend().unwrap(), Backend::Json);
        assert!(!config.migrate);
    }

    #[test]
    fn parse_transient() {
        let config: DocketConfig = toml::from_str("backend = \"transient\"").unwrap();
        assert_eq!(config.backend().unwrap(), Backend::Transient);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn parse_invalid_backend_returns_error() {
        let config: DocketConfig = toml::from_str("backend = \"sqlite\"").unwrap();
        assert!(matches!(config.backend(), Err(Error::Config(_))));
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config: DocketConfig = toml::from_str(DocketConfig::default_toml()).unwrap();
        assert_eq!(config, DocketConfig::default());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        DocketConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(
            DocketConfig::from_file(&path).unwrap(),
            DocketConfig::default()
        );
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "migrate = true\n").unwrap();
        DocketConfig::write_default_if_missing(&path).unwrap();

        assert!(DocketConfig::from_file(&path).unwrap().migrate);
    }

    #[test]
    fn from_file_rejects_unknown_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "backend = \"sqlite\"\n").unwrap();

        assert!(matches!(
            DocketConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = DocketConfig {
            backend: "transient".to_string(),
            log_level: "debug".to_string(),
            migrate: true,
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(DocketConfig::from_file(&path).unwrap(), config);
    }
}
