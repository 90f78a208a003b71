//! libris command line
//!
//! Scans an EPUB library into its SQLite catalog and answers simple
//! questions about what was indexed.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use libris_config::LibrisConfig;
use libris_library::{BookId, BookRecord, Library, ScanEvent, ScanResult, Table};
use std::path::PathBuf;
use std::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "libris", version, about = "Index an EPUB library into a catalog")]
struct Cli {
    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Library root directory
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Catalog database path
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the library root and index every EPUB found
    Scan {
        /// Number of parser threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep existing catalog rows instead of rebuilding
        #[arg(long)]
        keep: bool,
    },
    /// Drop every catalog row and recreate the schema
    Reset,
    /// List indexed books
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the archive path of a book
    Locate { id: BookId },
    /// Extract the cover image of a book
    Cover {
        id: BookId,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the package document of a book
    Package { id: BookId },
    /// Remove a book from the catalog
    Delete { id: BookId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config_logged(&cli)?;
    setup_logging(&config.logging.level);
    debug!("Library root {}", config.library.root.display());

    let mut library = Library::open(&config).with_context(|| {
        format!(
            "failed to open library {} (catalog {})",
            config.library.root.display(),
            config.library.database_path().display()
        )
    })?;

    match cli.command {
        Command::Scan { .. } => run_scan(library).await,
        Command::Reset => {
            library.reset().context("failed to reset catalog")?;
            info!("Catalog reset");
            Ok(())
        }
        Command::List { json } => {
            let books = library.catalog().list_books()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&books)?);
            } else {
                print_books(&books);
            }
            Ok(())
        }
        Command::Locate { id } => {
            println!("{}", library.locate(id)?.display());
            Ok(())
        }
        Command::Cover { id, output } => {
            let Some(cover) = library.cover(id)? else {
                bail!("book {id} has no cover image");
            };
            std::fs::write(&output, &cover.data)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(
                "Wrote {} bytes ({}) to {}",
                cover.data.len(),
                cover.media_type.as_deref().unwrap_or("unknown type"),
                output.display()
            );
            Ok(())
        }
        Command::Package { id } => {
            print!("{}", library.package_document(id)?);
            Ok(())
        }
        Command::Delete { id } => {
            let catalog = library.catalog_mut();
            catalog.delete_book(id)?;
            let languages = catalog.vacuum_languages()?;
            let authors = catalog.vacuum_authors()?;
            info!(
                "Deleted book {} ({} languages, {} authors no longer referenced)",
                id, languages, authors
            );
            Ok(())
        }
    }
}

/// [`load_config`] under a provisional subscriber, since the configured
/// level is not known yet
fn load_config_logged(cli: &Cli) -> Result<LibrisConfig> {
    tracing::subscriber::with_default(log_subscriber(log_filter("info")), || load_config(cli))
}

/// Resolve configuration from files, then apply command line overrides
fn load_config(cli: &Cli) -> Result<LibrisConfig> {
    let mut config = match &cli.config {
        Some(path) => LibrisConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => LibrisConfig::load_default().context("failed to load config")?,
    };

    if let Some(root) = &cli.root {
        config.library.root = root.clone();
    }
    if let Some(database) = &cli.database {
        config.library.database = Some(database.clone());
    }
    if let Command::Scan { workers, keep } = &cli.command {
        if let Some(workers) = workers {
            config.scan.workers = *workers;
        }
        if *keep {
            config.scan.rebuild = false;
        }
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Setup logging to stderr, `RUST_LOG` taking precedence over the config level
fn setup_logging(level: &str) {
    use tracing_subscriber::util::SubscriberInitExt;

    log_subscriber(log_filter(level)).init();
}

fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn log_subscriber(filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync {
    use tracing_subscriber::{fmt, layer::SubscriberExt};

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr),
    )
}

/// Run a scan on a blocking thread, reporting progress and honouring Ctrl-C
async fn run_scan(mut library: Library) -> Result<()> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing files in flight");
            interrupt.cancel();
        }
    });

    let reporter = tokio::task::spawn_blocking(move || report_progress(rx));

    let token = cancel.clone();
    let result = tokio::task::spawn_blocking(move || {
        let result = library.scan(Some(&tx), &token);
        (library, result)
    })
    .await
    .context("scan task panicked")?;

    reporter.await.context("progress reporter panicked")?;

    let (library, result) = result;
    let result = result.context("scan failed")?;
    print_summary(&library, &result)?;

    if result.cancelled {
        bail!("scan cancelled after {} files", result.files_scanned);
    }
    Ok(())
}

/// Drain scan events until the scanner hangs up
fn report_progress(rx: mpsc::Receiver<ScanEvent>) {
    for event in rx {
        match event {
            ScanEvent::Started { total } => info!("Scanning {} candidate files", total),
            ScanEvent::Progress { done, total, file } => {
                debug!("[{}/{}] {}", done, total, file)
            }
            ScanEvent::BookIndexed { file, book_id } => debug!("Indexed {} as {}", file, book_id),
            ScanEvent::FileFailed(failure) => {
                warn!("{}: {} ({})", failure.file, failure.message, failure.reason)
            }
            ScanEvent::Completed(result) => {
                info!("Scan finished in {}ms", result.duration_ms)
            }
        }
    }
}

fn print_summary(library: &Library, result: &ScanResult) -> Result<()> {
    let catalog = library.catalog();
    println!(
        "Scanned {} files, indexed {} books, {} failed",
        result.files_scanned,
        result.books_indexed,
        result.failures.len()
    );
    println!(
        "Catalog: {} books, {} titles, {} languages, {} authors",
        catalog.count(Table::Book)?,
        catalog.count(Table::Title)?,
        catalog.count(Table::Language)?,
        catalog.count(Table::Author)?
    );

    for failure in &result.failures {
        println!("  {} [{}] {}", failure.file, failure.reason, failure.message);
    }
    Ok(())
}

fn print_books(books: &[BookRecord]) {
    for book in books {
        let title = book.titles.first().map(String::as_str).unwrap_or("(untitled)");
        let authors: Vec<&str> = book.authors.iter().map(|a| a.name.as_str()).collect();
        println!(
            "{:>5}  {}  {}  [{}]  {}",
            book.id,
            title,
            authors.join(", "),
            book.languages.join(","),
            book.filename
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_provisional_subscriber_emits_warnings() {
        assert!(!tracing::enabled!(tracing::Level::WARN));
        tracing::subscriber::with_default(log_subscriber(EnvFilter::new("info")), || {
            assert!(tracing::enabled!(tracing::Level::WARN));
            assert!(!tracing::enabled!(tracing::Level::DEBUG));
        });
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[library]\nroot = \"/srv/books\"\n[scan]\nworkers = 3\n");

        let cli = Cli::try_parse_from([
            "libris",
            "--config",
            path.to_str().unwrap(),
            "--database",
            "/tmp/catalog.db",
            "scan",
            "--workers",
            "5",
            "--keep",
        ])
        .unwrap();
        let config = load_config_logged(&cli).unwrap();

        assert_eq!(config.library.root, PathBuf::from("/srv/books"));
        assert_eq!(config.library.database_path(), PathBuf::from("/tmp/catalog.db"));
        assert_eq!(config.scan.workers, 5);
        assert!(!config.scan.rebuild);
    }

    #[test]
    fn test_load_config_rejects_zero_workers() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[library]\nroot = \"/srv/books\"\n");

        let cli = Cli::try_parse_from([
            "libris",
            "--config",
            path.to_str().unwrap(),
            "scan",
            "--workers",
            "0",
        ])
        .unwrap();
        assert!(load_config_logged(&cli).is_err());
    }

    #[test]
    fn test_root_override_only_for_listing() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[scan]\nrebuild = true\n");

        let cli = Cli::try_parse_from([
            "libris",
            "list",
            "--json",
            "--root",
            "/data/ebooks",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let config = load_config_logged(&cli).unwrap();

        assert!(matches!(cli.command, Command::List { json: true }));
        assert_eq!(config.library.root, PathBuf::from("/data/ebooks"));
        assert!(config.scan.rebuild);
    }
}
