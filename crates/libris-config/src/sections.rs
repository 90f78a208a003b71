//! Configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory (relative to the library root) holding the default catalog
pub const CATALOG_DIR: &str = ".libris";

/// Default catalog file name
pub const CATALOG_FILE: &str = "books.db";

/// Where the books live and where the catalog is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Library root directory, scanned recursively
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Catalog database file. Defaults to `<root>/.libris/books.db`
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/libris/books")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            database: None,
        }
    }
}

impl LibraryConfig {
    /// Resolved catalog path
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.root.join(CATALOG_DIR).join(CATALOG_FILE))
    }
}

/// Scanner behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Archive extensions, compared case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Skip dot-files and dot-directories
    #[serde(default = "default_true")]
    pub skip_hidden: bool,

    /// Follow symbolic links while walking the tree
    #[serde(default)]
    pub follow_links: bool,

    /// Number of parser threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Reset the catalog before every scan
    #[serde(default = "default_true")]
    pub rebuild: bool,
}

fn default_extensions() -> Vec<String> {
    vec!["epub".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            skip_hidden: true,
            follow_links: false,
            workers: default_workers(),
            rebuild: true,
        }
    }
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_default() {
        let library = LibraryConfig {
            root: PathBuf::from("/books"),
            database: None,
        };
        assert_eq!(
            library.database_path(),
            PathBuf::from("/books/.libris/books.db")
        );
    }

    #[test]
    fn test_database_path_override() {
        let library = LibraryConfig {
            root: PathBuf::from("/books"),
            database: Some(PathBuf::from("/var/cache/catalog.db")),
        };
        assert_eq!(
            library.database_path(),
            PathBuf::from("/var/cache/catalog.db")
        );
    }

    #[test]
    fn test_scan_defaults() {
        let scan = ScanSettings::default();
        assert_eq!(scan.extensions, vec!["epub".to_string()]);
        assert!(scan.skip_hidden);
        assert!(!scan.follow_links);
        assert!(scan.workers >= 1);
        assert!(scan.rebuild);
    }
}
