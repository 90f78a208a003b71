//! Library handle tying a root directory to its catalog

use crate::{
    Archive, BookId, Catalog, CatalogError, LibraryError, ScanConfig, ScanEvent, ScanResult,
    Scanner, extract_metadata, resolve_package_path,
};
use libris_config::LibrisConfig;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Cover image bytes pulled from an archive
#[derive(Debug, Clone)]
pub struct Cover {
    pub media_type: Option<String>,
    pub data: Vec<u8>,
}

/// An indexed library: a root directory plus the catalog describing it
pub struct Library {
    root: PathBuf,
    catalog: Catalog,
    scanner: Scanner,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>, catalog: Catalog, scanner: Scanner) -> Self {
        Self {
            root: root.into(),
            catalog,
            scanner,
        }
    }

    /// Open the catalog named by the configuration, creating it if needed
    ///
    /// The library root must already exist; nothing is created on disk when
    /// it does not.
    pub fn open(config: &LibrisConfig) -> Result<Self, LibraryError> {
        let root = &config.library.root;
        if !root.is_dir() {
            return Err(LibraryError::PathNotFound(root.clone()));
        }

        let db_path = config.library.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let catalog = Catalog::open(&db_path)?;
        tracing::debug!("Opened catalog {}", db_path.display());

        let scanner = Scanner::with_config(ScanConfig::from(&config.scan));
        Ok(Self::new(root.clone(), catalog, scanner))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Scan the library root into the catalog
    pub fn scan(
        &mut self,
        events: Option<&Sender<ScanEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ScanResult, LibraryError> {
        self.scanner
            .scan(&self.root, &mut self.catalog, events, cancel)
    }

    /// Drop the catalog contents and recreate an empty schema
    pub fn reset(&mut self) -> Result<(), LibraryError> {
        self.catalog.reset()?;
        Ok(())
    }

    /// Absolute archive path of a book
    pub fn locate(&self, id: BookId) -> Result<PathBuf, LibraryError> {
        let filename = self
            .catalog
            .locate(id)?
            .ok_or(CatalogError::BookNotFound(id))?;
        Ok(self.root.join(filename))
    }

    /// Raw package document text of a book
    pub fn package_document(&self, id: BookId) -> Result<String, LibraryError> {
        let mut archive = Archive::open(self.locate(id)?)?;
        let package_path = resolve_package_path(&mut archive)?;
        Ok(archive.read_to_string(&package_path)?)
    }

    /// Cover image of a book, if the package declares one
    pub fn cover(&self, id: BookId) -> Result<Option<Cover>, LibraryError> {
        let path = self.locate(id)?;
        let label = self.catalog.locate(id)?.unwrap_or_default();

        let mut archive = Archive::open(&path)?;
        let package_path = resolve_package_path(&mut archive)?;
        let metadata = extract_metadata(&mut archive, &package_path, &label)?;

        let Some(href) = metadata.cover_href else {
            return Ok(None);
        };
        let data = archive.read(&href)?;
        Ok(Some(Cover {
            media_type: metadata.cover_media_type,
            data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BookMetadata;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_catalog_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = LibrisConfig::default();
        config.library.root = dir.path().to_path_buf();

        let library = Library::open(&config).unwrap();

        assert!(dir.path().join(".libris").join("books.db").exists());
        assert_eq!(library.root(), dir.path());
        assert_eq!(library.catalog().book_count().unwrap(), 0);
    }

    #[test]
    fn test_open_missing_root() {
        let dir = TempDir::new().unwrap();
        let mut config = LibrisConfig::default();
        config.library.root = dir.path().join("typo").join("books");

        let result = Library::open(&config);

        assert!(matches!(
            result,
            Err(LibraryError::PathNotFound(ref p)) if p == &config.library.root
        ));
        assert!(!dir.path().join("typo").exists());
    }

    #[test]
    fn test_open_explicit_database_elsewhere() {
        let root = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let mut config = LibrisConfig::default();
        config.library.root = root.path().to_path_buf();
        config.library.database = Some(state.path().join("catalog").join("books.db"));

        Library::open(&config).unwrap();

        assert!(state.path().join("catalog").join("books.db").exists());
        assert!(!root.path().join(".libris").exists());
    }

    #[test]
    fn test_locate_unknown_book() {
        let library = Library::new("/books", Catalog::in_memory().unwrap(), Scanner::new());
        assert!(matches!(
            library.locate(7),
            Err(LibraryError::Catalog(CatalogError::BookNotFound(7)))
        ));
    }

    #[test]
    fn test_locate_joins_root() {
        let mut library = Library::new("/books", Catalog::in_memory().unwrap(), Scanner::new());
        let id = library
            .catalog_mut()
            .add_book(&BookMetadata {
                identifier: "urn:isbn:1".to_string(),
                filename: "sf/dune.epub".to_string(),
                ..BookMetadata::default()
            })
            .unwrap();

        assert_eq!(library.locate(id).unwrap(), PathBuf::from("/books/sf/dune.epub"));
    }
}
