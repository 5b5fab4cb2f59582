//! Test utilities and fixtures for Runnel tests.
//!
//! Provides:
//! - A temporary data directory with a script tree on disk
//! - A small library domain (users, books, borrow records) with codecs
//! - Listener helpers for waiting on scheduled results

#![allow(dead_code)]

use rusqlite::Row;
use runnel::observability::tracing::init_test_tracing;
use runnel::{
    Config, Database, DeliveryContext, DirSource, Fields, Filter, Immediate, Listener, Query,
    RecordAccessor, RecordCodec, StorageError,
};
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// How long a test waits for a listener before failing.
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const CREATE_SQL: &str = r#"
-- Library schema
CREATE TABLE users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    gender INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE books (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    author TEXT
);

/* one row per borrowed book */
CREATE TABLE borrow (
    user_id TEXT NOT NULL,
    book_id TEXT NOT NULL,
    PRIMARY KEY (user_id, book_id)
);

CREATE TRIGGER drop_borrowed_books AFTER DELETE ON users
BEGIN
    DELETE FROM borrow WHERE user_id = OLD.id;
END;
"#;

pub const CLEAN_SQL: &str = r#"
DELETE FROM borrow;
DELETE FROM users;
DELETE FROM books;
"#;

/// Test fixture that manages a temporary data directory and script tree.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory holding everything
    pub temp_dir: TempDir,
    /// Directory the database file lives in
    pub data_dir: PathBuf,
    /// Root of the script source
    pub scripts_dir: PathBuf,
}

impl TestFixture {
    /// Create a fixture with the library creation and clean scripts.
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let data_dir = temp_dir.path().join("data");
        let scripts_dir = temp_dir.path().join("db");
        fs::create_dir_all(scripts_dir.join("migrations")).expect("failed to create script dir");

        let fixture = Self {
            temp_dir,
            data_dir,
            scripts_dir,
        };
        fixture.write_script("create.sql", CREATE_SQL);
        fixture.write_script("clean.sql", CLEAN_SQL);
        fixture
    }

    /// Write a script relative to the script root.
    pub fn write_script(&self, path: &str, body: &str) {
        fs::write(self.scripts_dir.join(path), body).expect("failed to write script");
    }

    /// File database configuration at `version`.
    pub fn config(&self, version: u32) -> Config {
        Config::file(&self.data_dir, &self.scripts_dir).with_version(version)
    }

    /// Path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.config(1).db_path().expect("file config has a path")
    }

    /// Open at version 1 with inline delivery and the library codecs registered.
    pub fn open(&self) -> Database {
        self.open_with(self.config(1), Arc::new(Immediate))
    }

    /// Open with an explicit configuration and delivery context.
    pub fn open_with(&self, config: Config, delivery: Arc<dyn DeliveryContext>) -> Database {
        let db = Database::open(&config, self.source(), delivery).expect("failed to open database");
        register_library(&db);
        db
    }

    /// In-memory database (never WAL) over the same scripts.
    pub fn open_in_memory(&self) -> Database {
        let config = Config::in_memory(&self.scripts_dir);
        self.open_with(config, Arc::new(Immediate))
    }

    pub fn source(&self) -> Arc<DirSource> {
        Arc::new(DirSource::new(&self.scripts_dir))
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub gender: i64,
    pub borrowed_books: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BorrowRecord {
    pub user_id: String,
    pub book_id: String,
}

#[derive(Debug)]
pub struct BookCodec;

impl RecordCodec for BookCodec {
    type Item = Book;

    fn row_of(&self, item: &Book) -> Fields {
        let mut fields = Fields::new()
            .with("id", item.id.clone())
            .with("name", item.name.clone());
        if let Some(author) = &item.author {
            fields.put("author", author.clone());
        }
        fields
    }

    fn item_of(&self, row: &Row<'_>) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            name: row.get(1)?,
            author: row.get(2)?,
        })
    }
}

#[derive(Debug)]
pub struct BorrowCodec;

impl RecordCodec for BorrowCodec {
    type Item = BorrowRecord;

    fn row_of(&self, item: &BorrowRecord) -> Fields {
        Fields::new()
            .with("user_id", item.user_id.clone())
            .with("book_id", item.book_id.clone())
    }

    fn item_of(&self, row: &Row<'_>) -> rusqlite::Result<BorrowRecord> {
        Ok(BorrowRecord {
            user_id: row.get(0)?,
            book_id: row.get(1)?,
        })
    }
}

/// Users persist and load their borrowed books through the same connection.
#[derive(Debug)]
pub struct UserCodec {
    borrow: RecordAccessor<BorrowCodec>,
    books: RecordAccessor<BookCodec>,
}

impl UserCodec {
    pub fn new() -> Self {
        Self {
            borrow: RecordAccessor::new("borrow", BorrowCodec),
            books: RecordAccessor::new("books", BookCodec),
        }
    }
}

impl RecordCodec for UserCodec {
    type Item = User;

    fn row_of(&self, item: &User) -> Fields {
        Fields::new()
            .with("id", item.id.clone())
            .with("name", item.name.clone())
            .with("gender", item.gender)
    }

    fn item_of(&self, row: &Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            gender: row.get(2)?,
            borrowed_books: Vec::new(),
        })
    }

    fn is_valid(&self, item: &User) -> bool {
        !item.id.is_empty()
    }

    fn after_insert(&self, item: &User, conn: &rusqlite::Connection) -> Result<(), StorageError> {
        for book in &item.borrowed_books {
            let record = BorrowRecord {
                user_id: item.id.clone(),
                book_id: book.id.clone(),
            };
            self.borrow.insert(conn, &record)?;
        }
        Ok(())
    }

    fn resolve(&self, item: &mut User, conn: &rusqlite::Connection) -> Result<(), StorageError> {
        let records = self
            .borrow
            .query(conn, &Query::new(Filter::new("user_id=?", [&item.id])))?;
        for record in records {
            let query = Query::new(Filter::new("id=?", [&record.book_id]));
            if let Some(book) = self.books.query_one(conn, &query)? {
                item.borrowed_books.push(book);
            }
        }
        Ok(())
    }
}

/// Register the library codecs.
pub fn register_library(db: &Database) {
    db.register(|| Ok(RecordAccessor::new("users", UserCodec::new())));
    db.register(|| Ok(RecordAccessor::new("books", BookCodec)));
    db.register(|| Ok(RecordAccessor::new("borrow", BorrowCodec)));
}

pub fn user(n: usize) -> User {
    User {
        id: format!("user-{n}"),
        name: format!("User {n}"),
        gender: (n % 2) as i64,
        borrowed_books: Vec::new(),
    }
}

pub fn book(n: usize) -> Book {
    Book {
        id: format!("book-{n}"),
        name: format!("Book {n}"),
        author: Some(format!("Author {}", n % 3)),
    }
}

/// A listener forwarding its result to the returned receiver.
pub fn listen<T: Send + 'static>() -> (Option<Listener<T>>, Receiver<Option<T>>) {
    let (tx, rx) = mpsc::channel();
    let listener: Listener<T> = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (Some(listener), rx)
}

/// Wait for a listener result, failing the test on timeout.
pub fn recv<T>(rx: &Receiver<Option<T>>) -> Option<T> {
    rx.recv_timeout(TIMEOUT).expect("listener was not called in time")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_script_tree() {
        let fixture = TestFixture::new();
        assert!(fixture.scripts_dir.join("create.sql").exists());
        assert!(fixture.scripts_dir.join("migrations").is_dir());
        assert!(fixture.db_path().ends_with("runnel.db"));
    }
}
