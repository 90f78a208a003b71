//! Configuration management for libris
//!
//! Handles the library location, catalog path, scanner options and logging.
//! Configuration lives in TOML files; the user file is layered over the
//! system file, and both are optional.

mod sections;

pub use sections::{CATALOG_DIR, CATALOG_FILE, LibraryConfig, LoggingConfig, ScanSettings};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// System-wide configuration directory
pub const CONFIG_DIR: &str = "/etc/libris";

/// Configuration file name inside either directory
pub const CONFIG_FILE: &str = "config.toml";

/// Main libris configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrisConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LibrisConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// The system file is read first and the user file is merged on top.
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut layered: Option<toml::Value> = None;

        let candidates = std::iter::once(Path::new(CONFIG_DIR).join(CONFIG_FILE))
            .chain(user_config_path());
        for path in candidates {
            if !path.exists() {
                continue;
            }
            let overlay: toml::Value = toml::from_str(&std::fs::read_to_string(&path)?)?;
            tracing::debug!("Loaded configuration layer {}", path.display());
            match layered.as_mut() {
                Some(base) => merge_toml(base, overlay),
                None => layered = Some(overlay),
            }
        }

        let Some(value) = layered else {
            tracing::warn!("No configuration file found, using defaults");
            return Ok(Self::default());
        };

        let config: Self = value.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the scanner cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.workers == 0 {
            return Err(ConfigError::Invalid(
                "scan.workers must be at least 1".to_string(),
            ));
        }
        if self.scan.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "scan.extensions must name at least one extension".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-user configuration file (`$XDG_CONFIG_HOME/libris/config.toml`)
pub fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|dir| dir.join("libris").join(CONFIG_FILE))
}

/// Helper function to merge TOML values
pub fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
