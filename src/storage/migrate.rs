//! Versioned schema migrations.
//!
//! The schema version lives in SQLite's own `user_version` header field.
//! Opening a database at a target version either:
//! - runs the creation script (fresh database, version 0)
//! - replays `migrations/<n>.sql` for every `old < n <= new`, ascending
//! - does nothing (already at the target)
//!
//! Creation and upgrades each run in a single transaction together with
//! the version bump, so a failure leaves the previous schema untouched and
//! the same upgrade can simply be retried.

use rusqlite::{Connection, TransactionBehavior};
use std::cmp::Ordering;
use std::io;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;
use thiserror::Error;

use super::schema::{schema_version, set_schema_version};
use super::script::{parse_script, ParseError};
use super::source::{join_path, ScriptSource};

/// Error type for schema creation and migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to open script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse script {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("statement in {path} failed: {source}")]
    Statement {
        path: String,
        statement: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot downgrade schema from version {from} to {to}")]
    Downgrade { from: u32, to: u32 },
}

/// A migration script discovered in the migrations directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub version: u32,
    pub name: String,
    pub path: String,
}

/// What opening the schema did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Created { version: u32 },
    Upgraded { from: u32, to: u32, applied: Vec<u32> },
    Unchanged { version: u32 },
}

/// Applies the creation script and migration scripts from a [`ScriptSource`].
pub struct MigrationEngine {
    source: Arc<dyn ScriptSource>,
    create_script: String,
    migrations_dir: String,
}

impl MigrationEngine {
    /// Create an engine reading `create_script` and `migrations_dir` from `source`.
    pub fn new(
        source: Arc<dyn ScriptSource>,
        create_script: impl Into<String>,
        migrations_dir: impl Into<String>,
    ) -> Self {
        Self {
            source,
            create_script: create_script.into(),
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Bring the schema to `target`, creating or upgrading as needed.
    ///
    /// # Errors
    ///
    /// Any script or statement failure, or a persisted version above `target`.
    #[tracing::instrument(skip(self, conn))]
    pub fn open(&self, conn: &mut Connection, target: u32) -> Result<SchemaChange, MigrationError> {
        let current = schema_version(conn)?;
        match current.cmp(&target) {
            Ordering::Equal => Ok(SchemaChange::Unchanged { version: current }),
            Ordering::Less if current == 0 => self.create(conn, target),
            Ordering::Less => self.upgrade(conn, current, target),
            Ordering::Greater => Err(MigrationError::Downgrade {
                from: current,
                to: target,
            }),
        }
    }

    /// Run the creation script and stamp `version`, all in one transaction.
    pub fn create(&self, conn: &mut Connection, version: u32) -> Result<SchemaChange, MigrationError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let executed = self.run_script(&tx, &self.create_script)?;
        set_schema_version(&tx, version)?;
        tx.commit()?;

        tracing::info!(
            script = %self.create_script,
            statements = executed,
            version,
            "Database schema created"
        );
        Ok(SchemaChange::Created { version })
    }

    /// Apply every migration with `old < version <= new` in one transaction.
    ///
    /// Nothing is committed unless every statement of every selected script
    /// succeeds, so a failed upgrade can be retried as is.
    pub fn upgrade(
        &self,
        conn: &mut Connection,
        old: u32,
        new: u32,
    ) -> Result<SchemaChange, MigrationError> {
        let scripts = self.pending(old, new)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        for script in &scripts {
            let executed = self.run_script(&tx, &script.path)?;
            tracing::debug!(
                script = %script.name,
                statements = executed,
                old_version = old,
                new_version = new,
                "Migration script applied"
            );
        }
        set_schema_version(&tx, new)?;
        tx.commit()?;

        let applied: Vec<u32> = scripts.iter().map(|s| s.version).collect();
        tracing::info!(from = old, to = new, applied = ?applied, "Database schema upgraded");
        Ok(SchemaChange::Upgraded {
            from: old,
            to: new,
            applied,
        })
    }

    /// All migration scripts, ascending by version.
    ///
    /// Entries whose name is not a version number are skipped.
    pub fn scripts(&self) -> Result<Vec<MigrationScript>, MigrationError> {
        let mut names = self
            .source
            .list_entries(&self.migrations_dir)
            .map_err(|source| MigrationError::Io {
                path: self.migrations_dir.clone(),
                source,
            })?;
        names.sort_by(|a, b| natural_cmp(a, b));

        let mut scripts: Vec<MigrationScript> = names
            .into_iter()
            .filter_map(|name| match script_version(&name) {
                Some(version) => Some(MigrationScript {
                    version,
                    path: join_path(&self.migrations_dir, &name),
                    name,
                }),
                None => {
                    tracing::warn!(file = %name, "Skipping invalidly named migration file");
                    None
                }
            })
            .collect();
        scripts.sort_by_key(|script| script.version);
        Ok(scripts)
    }

    /// The scripts an upgrade from `old` to `new` would apply.
    pub fn pending(&self, old: u32, new: u32) -> Result<Vec<MigrationScript>, MigrationError> {
        Ok(self
            .scripts()?
            .into_iter()
            .filter(|script| script.version > old && script.version <= new)
            .collect())
    }

    /// Read and split the script at `path` without running it.
    pub fn load_script(&self, path: &str) -> Result<Vec<String>, MigrationError> {
        let reader = self
            .source
            .read_script(path)
            .map_err(|source| MigrationError::Io {
                path: path.to_string(),
                source,
            })?;
        parse_script(reader).map_err(|source| MigrationError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Parse the script at `path` and execute its statements in order.
    ///
    /// Returns the number of statements executed. Runs on whatever
    /// transaction `conn` is currently in.
    pub fn run_script(&self, conn: &Connection, path: &str) -> Result<usize, MigrationError> {
        let statements = self.load_script(path)?;
        for statement in &statements {
            conn.execute_batch(statement)
                .map_err(|source| MigrationError::Statement {
                    path: path.to_string(),
                    statement: statement.clone(),
                    source,
                })?;
        }
        Ok(statements.len())
    }
}

/// Version encoded in a migration file name: `12.sql` or `12`.
pub fn script_version(name: &str) -> Option<u32> {
    name.strip_suffix(".sql").unwrap_or(name).parse().ok()
}

/// Compare names so that embedded numbers sort by value (`9.sql` < `10.sql`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let ord = compare_digits(&take_digits(&mut left), &take_digits(&mut right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a_value = a.trim_start_matches('0');
    let b_value = b.trim_start_matches('0');
    a_value
        .len()
        .cmp(&b_value.len())
        .then_with(|| a_value.cmp(b_value))
        .then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::source::MemorySource;

    const CREATE: &str = "CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT);";

    fn engine(source: MemorySource) -> MigrationEngine {
        MigrationEngine::new(Arc::new(source), "create.sql", "migrations")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    fn logged_versions(conn: &Connection) -> Vec<i64> {
        let mut stmt = conn.prepare("SELECT v FROM log ORDER BY seq").unwrap();
        let versions = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap();
        versions
    }

    /// Source with a `log` table created at version 1 and one script per version.
    fn versioned_source(versions: &[u32]) -> MemorySource {
        let mut source = MemorySource::new().with_script(
            "create.sql",
            "CREATE TABLE log (seq INTEGER PRIMARY KEY AUTOINCREMENT, v INTEGER);",
        );
        for v in versions {
            source.insert(
                format!("migrations/{v}.sql"),
                format!("INSERT INTO log (v) VALUES ({v});"),
            );
        }
        source
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec!["2.sql", "10.sql", "9.sql"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["2.sql", "9.sql", "10.sql"]);

        assert_eq!(natural_cmp("v2_b", "v2_a"), Ordering::Greater);
        assert_eq!(natural_cmp("007", "7"), Ordering::Greater);
        assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
    }

    #[test]
    fn test_script_version() {
        assert_eq!(script_version("3.sql"), Some(3));
        assert_eq!(script_version("12"), Some(12));
        assert_eq!(script_version("readme.md"), None);
        assert_eq!(script_version("3_add_index.sql"), None);
    }

    #[test]
    fn test_create_runs_script_and_sets_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let engine = engine(MemorySource::new().with_script("create.sql", CREATE));

        let change = engine.open(&mut conn, 3).unwrap();
        assert_eq!(change, SchemaChange::Created { version: 3 });
        assert!(table_exists(&conn, "users"));
        assert_eq!(schema_version(&conn).unwrap(), 3);

        assert_eq!(
            engine.open(&mut conn, 3).unwrap(),
            SchemaChange::Unchanged { version: 3 }
        );
    }

    #[test]
    fn test_failed_create_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let engine = engine(
            MemorySource::new().with_script("create.sql", format!("{CREATE} CREATE TABLE broken (;")),
        );

        let err = engine.open(&mut conn, 1).unwrap_err();
        assert!(matches!(err, MigrationError::Statement { .. }));
        assert!(!table_exists(&conn, "users"));
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_create_beyond_user_version_range_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let engine = engine(MemorySource::new().with_script("create.sql", CREATE));

        let err = engine.open(&mut conn, 3_000_000_000).unwrap_err();
        assert!(matches!(err, MigrationError::Database(_)));
        assert!(!table_exists(&conn, "users"));
        assert_eq!(schema_version(&conn).unwrap(), 0);

        // The database is still creatable at a representable version.
        assert_eq!(
            engine.open(&mut conn, 1).unwrap(),
            SchemaChange::Created { version: 1 }
        );
    }

    #[test]
    fn test_upgrade_applies_exact_range_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        let engine = engine(versioned_source(&[10, 2, 9, 3, 11]));
        engine.create(&mut conn, 2).unwrap();

        let change = engine.open(&mut conn, 10).unwrap();
        assert_eq!(
            change,
            SchemaChange::Upgraded {
                from: 2,
                to: 10,
                applied: vec![3, 9, 10],
            }
        );
        assert_eq!(logged_versions(&conn), vec![3, 9, 10]);
        assert_eq!(schema_version(&conn).unwrap(), 10);
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        let mut conn = Connection::open_in_memory().unwrap();
        let source = versioned_source(&[2])
            .with_script("migrations/README", "not sql at all (")
            .with_script("migrations/notes.sql", "neither (");
        let engine = engine(source);
        engine.create(&mut conn, 1).unwrap();

        engine.open(&mut conn, 2).unwrap();
        assert_eq!(logged_versions(&conn), vec![2]);
    }

    #[test]
    fn test_failing_script_rolls_back_whole_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        let source = versioned_source(&[2])
            .with_script("migrations/3.sql", "CREATE TABLE books (id TEXT);")
            .with_script("migrations/4.sql", "INSERT INTO missing_table VALUES (1);");
        let engine = engine(source);
        engine.create(&mut conn, 1).unwrap();

        let err = engine.open(&mut conn, 4).unwrap_err();
        assert!(matches!(err, MigrationError::Statement { ref path, .. } if path == "migrations/4.sql"));
        assert!(logged_versions(&conn).is_empty());
        assert!(!table_exists(&conn, "books"));
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_unparseable_script_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let source = versioned_source(&[2]).with_script("migrations/3.sql", "INSERT INTO log (v) VALUES ('3);");
        let engine = engine(source);
        engine.create(&mut conn, 1).unwrap();

        let err = engine.open(&mut conn, 3).unwrap_err();
        assert!(matches!(err, MigrationError::Parse { .. }));
        assert!(logged_versions(&conn).is_empty());
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_failed_upgrade_can_be_retried() {
        let mut conn = Connection::open_in_memory().unwrap();
        let broken = engine(versioned_source(&[2]).with_script("migrations/3.sql", "BOGUS;"));
        broken.create(&mut conn, 1).unwrap();
        assert!(broken.upgrade(&mut conn, 1, 3).is_err());

        let fixed = engine(versioned_source(&[2, 3]));
        fixed.upgrade(&mut conn, 1, 3).unwrap();
        assert_eq!(logged_versions(&conn), vec![2, 3]);
        assert_eq!(schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_downgrade_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let engine = engine(versioned_source(&[]));
        engine.create(&mut conn, 5).unwrap();

        let err = engine.open(&mut conn, 4).unwrap_err();
        assert!(matches!(err, MigrationError::Downgrade { from: 5, to: 4 }));
    }

    #[test]
    fn test_pending_lists_selected_scripts() {
        let engine = engine(versioned_source(&[1, 2, 3, 4]));
        let pending: Vec<u32> = engine.pending(1, 3).unwrap().iter().map(|s| s.version).collect();
        assert_eq!(pending, vec![2, 3]);
    }
}
