//! Per-table record access.
//!
//! A [`RecordAccessor`] runs the primitive CRUD statements for one table and
//! delegates the row <-> item mapping to a [`RecordCodec`]. All methods are
//! synchronous and take the connection of the task they run in, so nested
//! lookups from a codec reuse that connection instead of queueing behind
//! the writer.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Rows};
use std::collections::HashSet;

use super::StorageError;

/// Column values for one row, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    values: Vec<(String, Value)>,
}

impl Fields {
    /// Create an empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column value.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(column, value);
        self
    }

    /// Add or replace a column value.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }

    /// Look up a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(|(_, value)| value)
    }
}

/// What SQLite does when an insert violates a uniqueness constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    Rollback,
    Abort,
    Fail,
    Ignore,
    #[default]
    Replace,
}

impl ConflictPolicy {
    fn clause(self) -> &'static str {
        match self {
            Self::Rollback => "OR ROLLBACK",
            Self::Abort => "OR ABORT",
            Self::Fail => "OR FAIL",
            Self::Ignore => "OR IGNORE",
            Self::Replace => "OR REPLACE",
        }
    }
}

/// A `WHERE` clause with positional `?` arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub selection: Option<String>,
    pub args: Vec<Value>,
}

impl Filter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// A selection with text arguments, e.g. `Filter::new("id=?", ["user-3"])`.
    pub fn new<I>(selection: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Self {
            selection: Some(selection.into()),
            args: args
                .into_iter()
                .map(|arg| Value::Text(arg.to_string()))
                .collect(),
        }
    }

    /// A selection with typed arguments.
    pub fn with_values(selection: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            selection: Some(selection.into()),
            args,
        }
    }

    fn where_clause(&self) -> String {
        match self.selection.as_deref().map(str::trim) {
            Some(selection) if !selection.is_empty() => format!(" WHERE {selection}"),
            _ => String::new(),
        }
    }
}

/// A `SELECT` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Option<String>,
    pub limit: Option<u32>,
}

impl Query {
    /// Every row, in table order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Rows matching `filter`.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    fn sql(&self, table: &str) -> String {
        let mut sql = format!("SELECT * FROM {table}{}", self.filter.where_clause());
        if let Some(order_by) = self.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

impl From<Filter> for Query {
    fn from(filter: Filter) -> Self {
        Self::new(filter)
    }
}

/// Mapping between an entity type and its table rows.
pub trait RecordCodec: Send + Sync + 'static {
    /// The entity type stored in the table.
    type Item: Send + 'static;

    /// Column values to write for `item`.
    fn row_of(&self, item: &Self::Item) -> Fields;

    /// Build an item from the current row.
    fn item_of(&self, row: &Row<'_>) -> rusqlite::Result<Self::Item>;

    /// Items failing this check are silently not inserted.
    fn is_valid(&self, _item: &Self::Item) -> bool {
        true
    }

    /// Persist rows related to a freshly inserted item.
    fn after_insert(&self, _item: &Self::Item, _conn: &Connection) -> Result<(), StorageError> {
        Ok(())
    }

    /// Load related rows into an item read by a query.
    ///
    /// Runs after the query cursor has been released.
    fn resolve(&self, _item: &mut Self::Item, _conn: &Connection) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Synchronous CRUD over one table.
#[derive(Debug)]
pub struct RecordAccessor<C> {
    table: String,
    codec: C,
    conflict_policy: ConflictPolicy,
    deduplicate: bool,
}

impl<C: RecordCodec> RecordAccessor<C> {
    /// Create an accessor for `table`.
    pub fn new(table: impl Into<String>, codec: C) -> Self {
        Self {
            table: table.into(),
            codec,
            conflict_policy: ConflictPolicy::default(),
            deduplicate: false,
        }
    }

    /// Set the insert conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Drop rows whose column values repeat an earlier row of the same query.
    ///
    /// Every distinct row of a query is held in memory until it finishes.
    #[must_use]
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    /// Insert one item.
    ///
    /// Returns the new row id, or `None` when the item is absent, invalid,
    /// or ignored by the conflict policy.
    pub fn insert<'a>(
        &self,
        conn: &Connection,
        item: impl Into<Option<&'a C::Item>>,
    ) -> Result<Option<i64>, StorageError> {
        let Some(item) = item.into() else {
            return Ok(None);
        };
        if !self.codec.is_valid(item) {
            return Ok(None);
        }

        let fields = self.codec.row_of(item);
        let sql = if fields.is_empty() {
            format!(
                "INSERT {} INTO {} DEFAULT VALUES",
                self.conflict_policy.clause(),
                self.table
            )
        } else {
            let columns: Vec<String> = fields.columns().map(quote_identifier).collect();
            let placeholders = vec!["?"; fields.len()].join(", ");
            format!(
                "INSERT {} INTO {} ({}) VALUES ({placeholders})",
                self.conflict_policy.clause(),
                self.table,
                columns.join(", ")
            )
        };

        let changed = conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(fields.values()))?;
        if changed == 0 {
            return Ok(None);
        }
        let row_id = conn.last_insert_rowid();
        self.codec.after_insert(item, conn)?;
        Ok(Some(row_id))
    }

    /// Insert items one by one, returning how many rows were written.
    ///
    /// Atomic only when run inside a transaction, which every scheduled
    /// task is.
    pub fn insert_many<'a, I>(&self, conn: &Connection, items: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = &'a C::Item>,
    {
        let mut written = 0;
        for item in items {
            if self.insert(conn, item)?.is_some() {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Run a `SELECT` and map every row.
    pub fn query(&self, conn: &Connection, query: &Query) -> Result<Vec<C::Item>, StorageError> {
        let sql = query.sql(&self.table);
        let mut items = with_rows(conn, &sql, &query.filter.args, |rows| {
            let mut items = Vec::new();
            let mut seen: HashSet<Vec<ColumnKey>> = HashSet::new();
            while let Some(row) = rows.next()? {
                if self.deduplicate && !seen.insert(row_key(row)?) {
                    continue;
                }
                items.push(self.codec.item_of(row)?);
            }
            Ok(items)
        })?;

        for item in &mut items {
            self.codec.resolve(item, conn)?;
        }
        Ok(items)
    }

    /// Every row of the table.
    pub fn query_all(&self, conn: &Connection) -> Result<Vec<C::Item>, StorageError> {
        self.query(conn, &Query::all())
    }

    /// The first row matching `query`, if any.
    pub fn query_one(
        &self,
        conn: &Connection,
        query: &Query,
    ) -> Result<Option<C::Item>, StorageError> {
        let first = Query {
            limit: Some(1),
            ..query.clone()
        };
        Ok(self.query(conn, &first)?.into_iter().next())
    }

    /// Number of rows matching `filter`.
    pub fn count(&self, conn: &Connection, filter: &Filter) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table, filter.where_clause());
        with_rows(conn, &sql, &filter.args, |rows| match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)?.max(0) as u64),
            None => Ok(0),
        })
    }

    /// Overwrite the matching rows with the columns of `item`.
    pub fn update(
        &self,
        conn: &Connection,
        item: &C::Item,
        filter: &Filter,
    ) -> Result<usize, StorageError> {
        let fields = self.codec.row_of(item);
        if fields.is_empty() {
            return Err(StorageError::EmptyValues {
                table: self.table.clone(),
            });
        }
        let assignments: Vec<String> = fields
            .columns()
            .map(|column| format!("{} = ?", quote_identifier(column)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table,
            assignments.join(", "),
            filter.where_clause()
        );
        let params = fields.values().chain(filter.args.iter());
        Ok(conn.prepare_cached(&sql)?.execute(params_from_iter(params))?)
    }

    /// Delete the matching rows.
    pub fn delete(&self, conn: &Connection, filter: &Filter) -> Result<usize, StorageError> {
        let sql = format!("DELETE FROM {}{}", self.table, filter.where_clause());
        Ok(conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(filter.args.iter()))?)
    }

    /// Delete every row.
    pub fn delete_all(&self, conn: &Connection) -> Result<usize, StorageError> {
        self.delete(conn, &Filter::all())
    }
}

/// Run `read` over the rows of `sql`.
///
/// The statement and its cursor live only for the duration of this call and
/// are finalized on every exit path.
fn with_rows<T, F>(conn: &Connection, sql: &str, args: &[Value], read: F) -> Result<T, StorageError>
where
    F: FnOnce(&mut Rows<'_>) -> Result<T, StorageError>,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(args.iter()))?;
    read(&mut rows)
}

/// Hashable column value; reals compare by bit pattern.
#[derive(Debug, PartialEq, Eq, Hash)]
enum ColumnKey {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<Value> for ColumnKey {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(i) => Self::Integer(i),
            Value::Real(f) => Self::Real(f.to_bits()),
            Value::Text(s) => Self::Text(s),
            Value::Blob(b) => Self::Blob(b),
        }
    }
}

fn row_key(row: &Row<'_>) -> rusqlite::Result<Vec<ColumnKey>> {
    let columns = row.as_ref().column_count();
    (0..columns)
        .map(|i| row.get::<_, Value>(i).map(ColumnKey::from))
        .collect()
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
