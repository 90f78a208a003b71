//! Book catalog using SQLite

use crate::{Author, BookMetadata};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ToSql, Transaction, params};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Surrogate key of a book row
pub type BookId = i64;

/// Rows per multi-row INSERT, well under SQLite's bound parameter limit
const BULK_ROWS: usize = 200;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS book (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL UNIQUE,
        filename TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS title (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        book_id INTEGER NOT NULL,
        FOREIGN KEY (book_id) REFERENCES book(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS language (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        language TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS language_book (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        language_id INTEGER NOT NULL,
        book_id INTEGER NOT NULL,
        FOREIGN KEY (language_id) REFERENCES language(id) ON DELETE RESTRICT,
        FOREIGN KEY (book_id) REFERENCES book(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS author (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author TEXT NOT NULL,
        file_as TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS author_book (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        author_id INTEGER NOT NULL,
        book_id INTEGER NOT NULL,
        FOREIGN KEY (author_id) REFERENCES author(id) ON DELETE CASCADE,
        FOREIGN KEY (book_id) REFERENCES book(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_title_book ON title(book_id);
    CREATE INDEX IF NOT EXISTS idx_language_book_book ON language_book(book_id);
    CREATE INDEX IF NOT EXISTS idx_language_book_language ON language_book(language_id);
    CREATE INDEX IF NOT EXISTS idx_author_book_book ON author_book(book_id);
    CREATE INDEX IF NOT EXISTS idx_author_book_author ON author_book(author_id);
"#;

// Children before parents so foreign keys never dangle mid-drop.
const DROP_SCHEMA: &str = r#"
    DROP TABLE IF EXISTS author_book;
    DROP TABLE IF EXISTS language_book;
    DROP TABLE IF EXISTS title;
    DROP TABLE IF EXISTS author;
    DROP TABLE IF EXISTS language;
    DROP TABLE IF EXISTS book;
"#;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Schema creation failed: {0}")]
    SchemaCreationFailed(String),

    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CatalogError {
    /// Stable reason code recorded in scan failures
    pub fn reason(&self) -> &'static str {
        match self {
            CatalogError::DuplicateIdentifier(_) => "DuplicateIdentifier",
            CatalogError::ConstraintViolation(_) => "ConstraintViolation",
            CatalogError::SchemaCreationFailed(_) => "SchemaCreationFailed",
            CatalogError::BookNotFound(_) => "BookNotFound",
            CatalogError::Sqlite(_) => "Sqlite",
        }
    }
}

/// Catalog tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Book,
    Title,
    Language,
    LanguageBook,
    Author,
    AuthorBook,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Book => "book",
            Table::Title => "title",
            Table::Language => "language",
            Table::LanguageBook => "language_book",
            Table::Author => "author",
            Table::AuthorBook => "author_book",
        }
    }
}

/// A book with its associations, as read back from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookRecord {
    pub id: BookId,
    pub identifier: String,
    pub filename: String,
    pub titles: Vec<String>,
    pub authors: Vec<Author>,
    pub languages: Vec<String>,
}

/// Catalog database manager
///
/// The single writer for the catalog. Every book goes in through
/// [`Catalog::add_book`], which commits the book and all of its
/// associations in one transaction.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create a catalog
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory catalog (for testing)
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, CatalogError> {
        conn.pragma_update(None, "foreign_keys", true)?;

        let mut catalog = Self { conn };
        catalog.ensure_schema()?;

        Ok(catalog)
    }

    /// Create any missing tables
    ///
    /// Runs in one transaction: either every table exists afterwards or the
    /// catalog is left as it was.
    pub fn ensure_schema(&mut self) -> Result<(), CatalogError> {
        let tx = self.conn.transaction().map_err(schema_failed)?;
        tx.execute_batch(SCHEMA).map_err(schema_failed)?;
        tx.commit().map_err(schema_failed)
    }

    /// Drop every table and recreate an empty schema
    pub fn reset(&mut self) -> Result<(), CatalogError> {
        let tx = self.conn.transaction().map_err(schema_failed)?;
        tx.execute_batch(DROP_SCHEMA).map_err(schema_failed)?;
        tx.execute_batch(SCHEMA).map_err(schema_failed)?;
        tx.commit().map_err(schema_failed)?;
        tracing::info!("Catalog reset");
        Ok(())
    }

    /// Insert a book with its titles, languages and authors atomically
    pub fn add_book(&mut self, metadata: &BookMetadata) -> Result<BookId, CatalogError> {
        let tx = self.conn.transaction()?;

        let book_id = Self::insert_book(&tx, metadata)?;
        Self::attach_titles(&tx, book_id, &metadata.titles)?;
        Self::attach_languages(&tx, book_id, &metadata.languages)?;
        Self::attach_authors(&tx, book_id, &metadata.authors)?;

        tx.commit()?;
        Ok(book_id)
    }

    /// Insert the book row
    ///
    /// A colliding identifier fails with [`CatalogError::DuplicateIdentifier`];
    /// the existing row is never replaced.
    pub fn insert_book(tx: &Transaction, metadata: &BookMetadata) -> Result<BookId, CatalogError> {
        tx.execute(
            "INSERT INTO book (identifier, filename) VALUES (?1, ?2)",
            params![metadata.identifier, metadata.filename],
        )
        .map_err(|e| classify(e, Some(&metadata.identifier)))?;

        Ok(tx.last_insert_rowid())
    }

    /// Insert title rows in order
    pub fn attach_titles(
        tx: &Transaction,
        book_id: BookId,
        titles: &[String],
    ) -> Result<(), CatalogError> {
        for chunk in titles.chunks(BULK_ROWS) {
            let sql = bulk_sql("INSERT INTO title (title, book_id) VALUES", "(?, ?)", chunk.len());
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
            for title in chunk {
                values.push(title);
                values.push(&book_id);
            }
            tx.execute(&sql, values.as_slice())
                .map_err(|e| classify(e, None))?;
        }
        Ok(())
    }

    /// Link languages, adding unseen ones to the shared vocabulary first
    pub fn attach_languages(
        tx: &Transaction,
        book_id: BookId,
        languages: &[String],
    ) -> Result<(), CatalogError> {
        let mut unique: Vec<&String> = Vec::with_capacity(languages.len());
        for language in languages {
            if !unique.contains(&language) {
                unique.push(language);
            }
        }

        for chunk in unique.chunks(BULK_ROWS) {
            let sql = bulk_sql(
                "INSERT OR IGNORE INTO language (language) VALUES",
                "(?)",
                chunk.len(),
            );
            let values: Vec<&dyn ToSql> = chunk.iter().map(|l| *l as &dyn ToSql).collect();
            tx.execute(&sql, values.as_slice())
                .map_err(|e| classify(e, None))?;

            let sql = bulk_sql(
                "INSERT INTO language_book (language_id, book_id) VALUES",
                "((SELECT id FROM language WHERE language = ?), ?)",
                chunk.len(),
            );
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
            for language in chunk {
                values.push(*language);
                values.push(&book_id);
            }
            tx.execute(&sql, values.as_slice())
                .map_err(|e| classify(e, None))?;
        }
        Ok(())
    }

    /// Insert author rows and link them to the book
    ///
    /// Authors are not shared between books; every call inserts fresh rows.
    pub fn attach_authors(
        tx: &Transaction,
        book_id: BookId,
        authors: &[Author],
    ) -> Result<(), CatalogError> {
        for chunk in authors.chunks(BULK_ROWS) {
            let sql = format!(
                "{} RETURNING id",
                bulk_sql("INSERT INTO author (author, file_as) VALUES", "(?, ?)", chunk.len())
            );
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
            for author in chunk {
                values.push(&author.name);
                values.push(&author.file_as);
            }

            let mut stmt = tx.prepare(&sql)?;
            let author_ids = stmt
                .query_map(values.as_slice(), |row| row.get::<_, i64>(0))
                .map_err(|e| classify(e, None))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| classify(e, None))?;

            let sql = bulk_sql(
                "INSERT INTO author_book (author_id, book_id) VALUES",
                "(?, ?)",
                author_ids.len(),
            );
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(author_ids.len() * 2);
            for author_id in &author_ids {
                values.push(author_id);
                values.push(&book_id);
            }
            tx.execute(&sql, values.as_slice())
                .map_err(|e| classify(e, None))?;
        }
        Ok(())
    }

    /// Delete a book; titles and association rows go with it
    pub fn delete_book(&mut self, id: BookId) -> Result<(), CatalogError> {
        let deleted = self
            .conn
            .execute("DELETE FROM book WHERE id = ?1", params![id])
            .map_err(|e| classify(e, None))?;
        if deleted == 0 {
            return Err(CatalogError::BookNotFound(id));
        }
        Ok(())
    }

    /// Delete a vocabulary language
    ///
    /// Refused with [`CatalogError::ConstraintViolation`] while any book
    /// still references it. Returns whether a row was removed.
    pub fn delete_language(&mut self, language: &str) -> Result<bool, CatalogError> {
        let deleted = self
            .conn
            .execute("DELETE FROM language WHERE language = ?1", params![language])
            .map_err(|e| classify(e, None))?;
        Ok(deleted > 0)
    }

    /// Remove languages no book references any more
    pub fn vacuum_languages(&mut self) -> Result<usize, CatalogError> {
        let removed = self.conn.execute(
            "DELETE FROM language WHERE id NOT IN (SELECT language_id FROM language_book)",
            [],
        )?;
        Ok(removed)
    }

    /// Remove authors no book references any more
    pub fn vacuum_authors(&mut self) -> Result<usize, CatalogError> {
        let removed = self.conn.execute(
            "DELETE FROM author WHERE id NOT IN (SELECT author_id FROM author_book)",
            [],
        )?;
        Ok(removed)
    }

    /// Get a book by ID
    pub fn get_book(&self, id: BookId) -> Result<Option<BookRecord>, CatalogError> {
        Ok(self.load_books(Some(id))?.into_iter().next())
    }

    /// Get all books, ordered by ID
    pub fn list_books(&self) -> Result<Vec<BookRecord>, CatalogError> {
        self.load_books(None)
    }

    /// Stored archive filename (relative to the library root)
    pub fn locate(&self, id: BookId) -> Result<Option<String>, CatalogError> {
        let filename = self
            .conn
            .query_row(
                "SELECT filename FROM book WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(filename)
    }

    /// Look a book up by its unique identifier
    pub fn find_by_identifier(&self, identifier: &str) -> Result<Option<BookId>, CatalogError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM book WHERE identifier = ?1",
                params![identifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Row count of a table
    pub fn count(&self, table: Table) -> Result<i64, CatalogError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get total book count
    pub fn book_count(&self) -> Result<i64, CatalogError> {
        self.count(Table::Book)
    }

    fn load_books(&self, only: Option<BookId>) -> Result<Vec<BookRecord>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identifier, filename FROM book WHERE ?1 IS NULL OR id = ?1 ORDER BY id",
        )?;
        let mut books = stmt
            .query_map(params![only], |row| {
                Ok(BookRecord {
                    id: row.get(0)?,
                    identifier: row.get(1)?,
                    filename: row.get(2)?,
                    titles: Vec::new(),
                    authors: Vec::new(),
                    languages: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let index: HashMap<BookId, usize> =
            books.iter().enumerate().map(|(i, b)| (b.id, i)).collect();

        let mut stmt = self.conn.prepare(
            "SELECT book_id, title FROM title WHERE ?1 IS NULL OR book_id = ?1 ORDER BY id",
        )?;
        let titles = stmt.query_map(params![only], |row| {
            Ok((row.get::<_, BookId>(0)?, row.get::<_, String>(1)?))
        })?;
        for title in titles {
            let (book_id, title) = title?;
            if let Some(&i) = index.get(&book_id) {
                books[i].titles.push(title);
            }
        }

        let mut stmt = self.conn.prepare(
            r#"SELECT ab.book_id, a.author, a.file_as FROM author_book ab
               JOIN author a ON a.id = ab.author_id
               WHERE ?1 IS NULL OR ab.book_id = ?1
               ORDER BY ab.id"#,
        )?;
        let authors = stmt.query_map(params![only], |row| {
            Ok((
                row.get::<_, BookId>(0)?,
                Author::with_file_as(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            ))
        })?;
        for author in authors {
            let (book_id, author) = author?;
            if let Some(&i) = index.get(&book_id) {
                books[i].authors.push(author);
            }
        }

        let mut stmt = self.conn.prepare(
            r#"SELECT lb.book_id, l.language FROM language_book lb
               JOIN language l ON l.id = lb.language_id
               WHERE ?1 IS NULL OR lb.book_id = ?1
               ORDER BY lb.id"#,
        )?;
        let languages = stmt.query_map(params![only], |row| {
            Ok((row.get::<_, BookId>(0)?, row.get::<_, String>(1)?))
        })?;
        for language in languages {
            let (book_id, language) = language?;
            if let Some(&i) = index.get(&book_id) {
                books[i].languages.push(language);
            }
        }

        Ok(books)
    }
}

/// `head (row), (row), ...` with `rows` copies of the row template
fn bulk_sql(head: &str, row: &str, rows: usize) -> String {
    let mut sql = String::with_capacity(head.len() + rows * (row.len() + 2));
    sql.push_str(head);
    sql.push(' ');
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(row);
    }
    sql
}

fn schema_failed(err: rusqlite::Error) -> CatalogError {
    tracing::error!("Catalog schema creation failed: {}", err);
    CatalogError::SchemaCreationFailed(err.to_string())
}

/// Turn SQLite constraint failures into typed catalog errors
fn classify(err: rusqlite::Error, identifier: Option<&str>) -> CatalogError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err
        && code.code == ErrorCode::ConstraintViolation
    {
        let message = message.clone().unwrap_or_else(|| code.to_string());
        if let Some(identifier) = identifier
            && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            && message.contains("book.identifier")
        {
            return CatalogError::DuplicateIdentifier(identifier.to_string());
        }
        return CatalogError::ConstraintViolation(message);
    }
    CatalogError::Sqlite(err)
}
