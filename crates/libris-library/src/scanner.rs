//! Library scanning
//!
//! Discovery and parsing are separate: [`discover`] lazily yields candidate
//! archives, and [`Scanner::scan`] fans them out to parser threads while the
//! calling thread stays the only writer to the [`Catalog`].

use crate::{
    Archive, BookId, BookMetadata, Catalog, CatalogError, LibraryError, ParseError,
    extract_metadata, resolve_package_path,
};
use libris_config::ScanSettings;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// A file that could not be indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    /// Path relative to the library root
    pub file: String,
    /// Reason code, e.g. `ContainerMissing`
    pub reason: String,
    pub message: String,
}

/// Result of a library scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub files_scanned: usize,
    pub books_indexed: usize,
    pub failures: Vec<ScanFailure>,
    pub duration_ms: u64,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

/// Progress notifications emitted while scanning
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Discovery finished
    Started { total: usize },
    /// One more file handled, successfully or not
    Progress {
        done: usize,
        total: usize,
        file: String,
    },
    BookIndexed { file: String, book_id: BookId },
    FileFailed(ScanFailure),
    Completed(ScanResult),
}

/// Library scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to scan, lowercase
    pub extensions: HashSet<String>,

    /// Skip hidden files/directories
    pub skip_hidden: bool,

    /// Follow symbolic links
    pub follow_links: bool,

    /// Parser threads
    pub workers: usize,

    /// Reset the catalog before populating it
    pub rebuild: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ScanConfig {
    fn from(settings: &ScanSettings) -> Self {
        let extensions = settings
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            extensions,
            skip_hidden: settings.skip_hidden,
            follow_links: settings.follow_links,
            workers: settings.workers.max(1),
            rebuild: settings.rebuild,
        }
    }
}

/// Whether `path` has one of the archive extensions (case-insensitive)
pub fn is_candidate(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.contains(&ext.to_lowercase()))
}

/// Lazily walk `root` depth-first, yielding candidate archive paths
pub fn discover<'a>(root: &Path, config: &'a ScanConfig) -> impl Iterator<Item = PathBuf> + 'a {
    let skip_hidden = config.skip_hidden;

    WalkDir::new(root)
        .follow_links(config.follow_links)
        .into_iter()
        .filter_entry(move |entry| {
            !(skip_hidden && entry.depth() > 0 && is_hidden(entry.file_name()))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(move |path| is_candidate(path, &config.extensions))
}

/// Path of `path` relative to `root`, always `/`-separated
pub fn relative_label(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Send an event if anyone is listening; a gone receiver is not an error
fn emit(events: Option<&Sender<ScanEvent>>, event: ScanEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Library scanner
pub struct Scanner {
    config: ScanConfig,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Create a new scanner with default config
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    /// Create with custom config
    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one archive through container resolution and metadata extraction
    pub fn read_book(root: &Path, path: &Path) -> Result<BookMetadata, ParseError> {
        let label = relative_label(root, path);
        let mut archive = Archive::open(path)?;
        let package_path = resolve_package_path(&mut archive)?;
        extract_metadata(&mut archive, &package_path, &label)
    }

    /// Scan `root` and populate `catalog`
    ///
    /// Per-file failures are recorded in the result and never abort the
    /// scan. Only catalog-level failures (schema creation, I/O on the
    /// database) are returned as errors. Every book commits in its own
    /// transaction, so cancelling leaves no half-written book behind.
    pub fn scan(
        &self,
        root: &Path,
        catalog: &mut Catalog,
        events: Option<&Sender<ScanEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ScanResult, LibraryError> {
        let started = Instant::now();

        if !root.is_dir() {
            return Err(LibraryError::PathNotFound(root.to_path_buf()));
        }
        let root = root.canonicalize()?;

        if self.config.rebuild {
            catalog.reset()?;
        } else {
            catalog.ensure_schema()?;
        }

        let candidates: Vec<PathBuf> = discover(&root, &self.config).collect();
        let total = candidates.len();
        info!("Scanning {} archives under {}", total, root.display());
        emit(events, ScanEvent::Started { total });

        let next = AtomicUsize::new(0);
        let workers = self.config.workers.clamp(1, total.max(1));
        let mut result = ScanResult::default();
        let mut fatal: Option<CatalogError> = None;

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(&PathBuf, Result<BookMetadata, ParseError>)>();

            for _ in 0..workers {
                let tx = tx.clone();
                let (next, candidates, root) = (&next, &candidates, &root);
                scope.spawn(move || {
                    while !cancel.is_cancelled() {
                        let Some(path) = candidates.get(next.fetch_add(1, Ordering::Relaxed))
                        else {
                            break;
                        };
                        debug!("Reading {}", path.display());
                        let outcome = Self::read_book(root, path);
                        if tx.send((path, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (path, outcome) in rx {
                if cancel.is_cancelled() {
                    break;
                }

                let file = relative_label(&root, path);
                result.files_scanned += 1;

                let failure = match outcome {
                    Ok(metadata) => match catalog.add_book(&metadata) {
                        Ok(book_id) => {
                            result.books_indexed += 1;
                            info!("Added to library: {}", file);
                            emit(
                                events,
                                ScanEvent::BookIndexed {
                                    file: file.clone(),
                                    book_id,
                                },
                            );
                            None
                        }
                        Err(
                            err @ (CatalogError::DuplicateIdentifier(_)
                            | CatalogError::ConstraintViolation(_)),
                        ) => Some((err.reason(), err.to_string())),
                        Err(err) => {
                            fatal = Some(err);
                            break;
                        }
                    },
                    Err(err) => Some((err.reason(), err.to_string())),
                };

                if let Some((reason, message)) = failure {
                    warn!("Failed to index {}: {} ({})", file, reason, message);
                    let failure = ScanFailure {
                        file: file.clone(),
                        reason: reason.to_string(),
                        message,
                    };
                    emit(events, ScanEvent::FileFailed(failure.clone()));
                    result.failures.push(failure);
                }

                emit(
                    events,
                    ScanEvent::Progress {
                        done: result.files_scanned,
                        total,
                        file,
                    },
                );
            }
        });

        if let Some(err) = fatal {
            error!("Scan aborted: {}", err);
            return Err(err.into());
        }

        result.cancelled = cancel.is_cancelled() && result.files_scanned < total;
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.cancelled {
            warn!(
                "Scan cancelled after {}/{} files, {} books indexed",
                result.files_scanned, total, result.books_indexed
            );
        } else {
            info!(
                "Scan complete: {} files, {} books indexed, {} failures in {}ms",
                result.files_scanned,
                result.books_indexed,
                result.failures.len(),
                result.duration_ms
            );
        }
        emit(events, ScanEvent::Completed(result.clone()));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn extensions(list: &[&str]) -> HashSet<String> {
        list.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_is_candidate_case_insensitive() {
        let exts = extensions(&["epub"]);
        assert!(is_candidate(Path::new("/books/a.epub"), &exts));
        assert!(is_candidate(Path::new("/books/B.EPUB"), &exts));
        assert!(is_candidate(Path::new("c.Epub"), &exts));
        assert!(!is_candidate(Path::new("/books/a.pdf"), &exts));
        assert!(!is_candidate(Path::new("/books/epub"), &exts));
    }

    #[test]
    fn test_relative_label() {
        let root = Path::new("/srv/books");
        assert_eq!(
            relative_label(root, Path::new("/srv/books/sf/dune.epub")),
            "sf/dune.epub"
        );
        assert_eq!(relative_label(root, Path::new("/srv/books/a.epub")), "a.epub");
    }

    #[test]
    fn test_scan_config_from_settings() {
        let settings = ScanSettings {
            extensions: vec![".EPUB".to_string(), " kepub ".to_string(), String::new()],
            workers: 0,
            ..ScanSettings::default()
        };
        let config = ScanConfig::from(&settings);
        assert_eq!(config.extensions, extensions(&["epub", "kepub"]));
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_discover_walks_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("fiction/classics")).unwrap();
        fs::create_dir_all(root.join(".libris")).unwrap();
        fs::write(root.join("a.epub"), b"x").unwrap();
        fs::write(root.join("fiction/B.EPUB"), b"x").unwrap();
        fs::write(root.join("fiction/classics/c.epub"), b"x").unwrap();
        fs::write(root.join("fiction/notes.txt"), b"x").unwrap();
        fs::write(root.join(".hidden.epub"), b"x").unwrap();
        fs::write(root.join(".libris/d.epub"), b"x").unwrap();
        fs::create_dir_all(root.join("dir.epub")).unwrap();

        let config = ScanConfig::default();
        let mut found: Vec<String> = discover(root, &config)
            .map(|p| relative_label(root, &p))
            .collect();
        found.sort();

        assert_eq!(
            found,
            vec!["a.epub", "fiction/B.EPUB", "fiction/classics/c.epub"]
        );
    }

    #[test]
    fn test_discover_includes_hidden_when_configured() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".hidden.epub"), b"x").unwrap();

        let config = ScanConfig {
            skip_hidden: false,
            ..ScanConfig::default()
        };
        assert_eq!(discover(dir.path(), &config).count(), 1);
    }

    #[test]
    fn test_scan_missing_root() {
        let mut catalog = Catalog::in_memory().unwrap();
        let result = Scanner::new().scan(
            Path::new("/nonexistent/library"),
            &mut catalog,
            None,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(LibraryError::PathNotFound(_))));
    }
}
