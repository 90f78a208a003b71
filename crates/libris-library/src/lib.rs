//! E-book library service for libris
//!
//! Walks a library directory, pulls bibliographic metadata out of every EPUB
//! archive it finds and stores it in an SQLite catalog of books, titles,
//! languages and authors.
//!
//! The parsing pipeline is archive -> container descriptor -> package
//! document. Each stage is a plain function over an [`Archive`]; only the
//! [`Catalog`] holds state.

mod archive;
mod container;
mod database;
mod library;
mod package;
mod scanner;

#[cfg(test)]
mod fixtures;

pub use archive::{Archive, MAX_DOCUMENT_BYTES, MAX_ENTRY_BYTES};
pub use container::{CONTAINER_PATH, PACKAGE_MEDIA_TYPE, parse_container, resolve_package_path};
pub use database::{BookId, BookRecord, Catalog, CatalogError, Table};
pub use library::{Cover, Library};
pub use package::{Author, BookMetadata, derive_file_as, extract_metadata, parse_package};
pub use scanner::{
    ScanConfig, ScanEvent, ScanFailure, ScanResult, Scanner, discover, is_candidate,
    relative_label,
};

pub use tokio_util::sync::CancellationToken;

use std::path::PathBuf;
use thiserror::Error;

/// Why a single archive could not be turned into a [`BookMetadata`]
///
/// These never abort a scan; they end up in [`ScanResult::failures`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Not an archive: {0}")]
    NotAnArchive(String),

    #[error("Archive entry not found: {0}")]
    EntryNotFound(String),

    #[error("Unreadable archive entry {entry}: {message}")]
    CorruptEntry { entry: String, message: String },

    #[error("Container descriptor missing")]
    ContainerMissing,

    #[error("Container descriptor malformed: {0}")]
    ContainerMalformed(String),

    #[error("No rootfile declared in container descriptor")]
    NoRootfileDeclared,

    #[error("Package document missing: {0}")]
    PackageMissing(String),

    #[error("Package document malformed: {0}")]
    PackageMalformed(String),

    #[error("Required field missing: {0}")]
    RequiredFieldMissing(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    /// Stable reason code recorded in scan failures
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::NotAnArchive(_) => "NotAnArchive",
            ParseError::EntryNotFound(_) => "EntryNotFound",
            ParseError::CorruptEntry { .. } => "CorruptEntry",
            ParseError::ContainerMissing => "ContainerMissing",
            ParseError::ContainerMalformed(_) => "ContainerMalformed",
            ParseError::NoRootfileDeclared => "NoRootfileDeclared",
            ParseError::PackageMissing(_) => "PackageMissing",
            ParseError::PackageMalformed(_) => "PackageMalformed",
            ParseError::RequiredFieldMissing(_) => "RequiredFieldMissing",
            ParseError::Io(_) => "Io",
        }
    }
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(ParseError::ContainerMissing.reason(), "ContainerMissing");
        assert_eq!(
            ParseError::RequiredFieldMissing("identifier").reason(),
            "RequiredFieldMissing"
        );
        assert_eq!(
            ParseError::PackageMissing("OEBPS/content.opf".to_string()).reason(),
            "PackageMissing"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::RequiredFieldMissing("identifier");
        assert!(format!("{}", err).contains("identifier"));

        let err = LibraryError::PathNotFound(PathBuf::from("/books"));
        assert!(format!("{}", err).contains("/books"));
    }
}
