//! The database context.
//!
//! [`Database::open`] brings the schema to the configured version, decides
//! whether WAL is available and starts the scheduler. Every table operation
//! then goes through a [`Table`], which schedules the matching
//! [`RecordAccessor`] call on the right pool and reports back through a
//! listener.

use rusqlite::types::Value;
use rusqlite::Connection;
use std::fs;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ConfigurationError, Result};
use crate::registry::AccessorRegistry;
use crate::scheduler::{DeliveryContext, Listener, Scheduler, SchedulerError, Task};
use crate::storage::accessor::{Filter, Query, RecordAccessor, RecordCodec};
use crate::storage::migrate::{MigrationEngine, SchemaChange};
use crate::storage::reader::ReaderPool;
use crate::storage::schema::{apply_writer_pragmas, enable_write_ahead_log, schema_version};
use crate::storage::source::ScriptSource;
use crate::storage::StorageError;

/// Shared handle to an open database.
///
/// Cheap to clone; the scheduler stops when the last clone is dropped or
/// [`Database::shutdown`] is called.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    engine: MigrationEngine,
    registry: AccessorRegistry,
    scheduler: Scheduler,
    schema_change: SchemaChange,
}

impl Database {
    /// Open the database described by `config`.
    ///
    /// Runs creation or migration synchronously, before any task can be
    /// scheduled. Listener callbacks are posted to `delivery`.
    #[tracing::instrument(skip_all, fields(db = %config.db_name, version = config.db_version))]
    pub fn open(
        config: &Config,
        source: Arc<dyn ScriptSource>,
        delivery: Arc<dyn DeliveryContext>,
    ) -> Result<Self> {
        config.validate()?;

        let db_path = config.db_path();
        let mut writer = match &db_path {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        apply_writer_pragmas(&writer)?;
        let wal_enabled = enable_write_ahead_log(&writer)?;

        let engine = MigrationEngine::new(source, &config.create_script, &config.migrations_dir);
        let schema_change = engine.open(&mut writer, config.db_version)?;

        let readers = match (&db_path, wal_enabled) {
            (Some(path), true) => Some(ReaderPool::new(path, config.reader_pool_size)?),
            _ => None,
        };
        let scheduler = Scheduler::start(
            writer,
            readers,
            config.reader_pool_size as usize,
            delivery,
        )?;

        tracing::info!(
            path = ?db_path,
            wal_enabled,
            change = ?schema_change,
            "Database opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                engine,
                registry: AccessorRegistry::new(),
                scheduler,
                schema_change,
            }),
        })
    }

    /// Register the factory building the accessor for codec `C`.
    pub fn register<C, F>(&self, factory: F)
    where
        C: RecordCodec,
        F: Fn() -> anyhow::Result<RecordAccessor<C>> + Send + Sync + 'static,
    {
        self.inner.registry.register(factory);
    }

    /// The table surface for codec `C`.
    pub fn table<C: RecordCodec>(&self) -> Result<Table<C>, ConfigurationError> {
        let accessor = self.inner.registry.resolve::<C>()?;
        Ok(Table {
            accessor,
            db: self.clone(),
        })
    }

    /// The accessor registry.
    pub fn registry(&self) -> &AccessorRegistry {
        &self.inner.registry
    }

    /// The scheduler running every task.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// The configuration the database was opened with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// What opening did to the schema.
    pub fn schema_change(&self) -> &SchemaChange {
        &self.inner.schema_change
    }

    /// Whether reads run concurrently with the writer.
    pub fn is_wal_enabled(&self) -> bool {
        self.inner.scheduler.wal_enabled()
    }

    /// The persisted schema version, read through the scheduler.
    pub fn schema_version(&self) -> Result<u32> {
        let version = self.inner.scheduler.run_blocking(
            Task::read(|conn| Ok(schema_version(conn)?)).named("schema_version"),
        )?;
        Ok(version)
    }

    /// Run the clean script on the writer in one transaction and wait.
    ///
    /// Returns the number of statements executed.
    pub fn clean_all_tables(&self) -> Result<usize> {
        let statements = self.inner.engine.load_script(&self.inner.config.clean_script)?;
        let executed = self.inner.scheduler.run_blocking(
            Task::write(move |conn| {
                for statement in &statements {
                    conn.execute_batch(statement)?;
                }
                Ok(statements.len())
            })
            .named("clean_all_tables"),
        )?;
        tracing::info!(statements = executed, "All tables cleaned");
        Ok(executed)
    }

    /// Run `work` on the writer and await the result.
    pub fn write<T, F>(&self, work: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let pending = self.inner.scheduler.run_async(Task::write(work).named("write"));
        async move { Ok(pending.await?) }
    }

    /// Run `work` on a reader (or the writer when WAL is off) and await the result.
    pub fn read<T, F>(&self, work: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let pending = self.inner.scheduler.run_async(Task::read(work).named("read"));
        async move { Ok(pending.await?) }
    }

    /// Stop the scheduler after the queued tasks finish.
    ///
    /// Later submissions fail with [`SchedulerError::ShutDown`].
    pub fn shutdown(&self) -> Result<()> {
        self.inner.scheduler.shutdown()?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.config.db_path())
            .field("schema_change", &self.inner.schema_change)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

/// Scheduled CRUD operations for one table.
///
/// Each call returns once the task is queued. Its listener later receives
/// `Some(result)`, or `None` if the task failed and was rolled back.
pub struct Table<C: RecordCodec> {
    accessor: Arc<RecordAccessor<C>>,
    db: Database,
}

impl<C: RecordCodec> Clone for Table<C> {
    fn clone(&self) -> Self {
        Self {
            accessor: self.accessor.clone(),
            db: self.db.clone(),
        }
    }
}

impl<C: RecordCodec> Table<C> {
    /// The accessor behind this table.
    pub fn accessor(&self) -> &Arc<RecordAccessor<C>> {
        &self.accessor
    }

    /// Insert one item; the listener receives the new row id, if any.
    pub fn insert(
        &self,
        item: impl Into<Option<C::Item>>,
        listener: Option<Listener<Option<i64>>>,
    ) -> Result<(), SchedulerError> {
        let item = item.into();
        self.write("insert", listener, move |accessor, conn| {
            accessor.insert(conn, item.as_ref())
        })
    }

    /// Insert several items in one transaction.
    pub fn insert_many(
        &self,
        items: Vec<C::Item>,
        listener: Option<Listener<usize>>,
    ) -> Result<(), SchedulerError> {
        self.write("insert_many", listener, move |accessor, conn| {
            accessor.insert_many(conn, &items)
        })
    }

    /// Select the rows matching `query`.
    pub fn select(
        &self,
        query: Query,
        listener: Option<Listener<Vec<C::Item>>>,
    ) -> Result<(), SchedulerError> {
        self.read("select", listener, move |accessor, conn| {
            accessor.query(conn, &query)
        })
    }

    /// Select the first row matching `query`.
    pub fn query_one(
        &self,
        query: Query,
        listener: Option<Listener<Option<C::Item>>>,
    ) -> Result<(), SchedulerError> {
        self.read("query_one", listener, move |accessor, conn| {
            accessor.query_one(conn, &query)
        })
    }

    /// Overwrite the rows matching `filter`; the listener receives the row count.
    pub fn update(
        &self,
        item: C::Item,
        filter: Filter,
        listener: Option<Listener<usize>>,
    ) -> Result<(), SchedulerError> {
        self.write("update", listener, move |accessor, conn| {
            accessor.update(conn, &item, &filter)
        })
    }

    /// Overwrite the row whose `id` column equals `id`.
    pub fn update_by_id(
        &self,
        item: C::Item,
        id: impl Into<Value>,
        listener: Option<Listener<usize>>,
    ) -> Result<(), SchedulerError> {
        let filter = Filter::with_values("id=?", vec![id.into()]);
        self.update(item, filter, listener)
    }

    /// Delete the rows matching `filter`.
    pub fn delete(
        &self,
        filter: Filter,
        listener: Option<Listener<usize>>,
    ) -> Result<(), SchedulerError> {
        self.write("delete", listener, move |accessor, conn| {
            accessor.delete(conn, &filter)
        })
    }

    /// Delete every row.
    pub fn delete_all(&self, listener: Option<Listener<usize>>) -> Result<(), SchedulerError> {
        self.write("delete_all", listener, |accessor, conn| {
            accessor.delete_all(conn)
        })
    }

    /// Count the rows matching `filter`.
    pub fn count(
        &self,
        filter: Filter,
        listener: Option<Listener<u64>>,
    ) -> Result<(), SchedulerError> {
        self.read("count", listener, move |accessor, conn| {
            accessor.count(conn, &filter)
        })
    }

    fn write<T, F>(
        &self,
        label: &'static str,
        listener: Option<Listener<T>>,
        work: F,
    ) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&RecordAccessor<C>, &Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let accessor = self.accessor.clone();
        let task = Task::write(move |conn| work(&accessor, conn));
        self.submit(task, label, listener)
    }

    fn read<T, F>(
        &self,
        label: &'static str,
        listener: Option<Listener<T>>,
        work: F,
    ) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&RecordAccessor<C>, &Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let accessor = self.accessor.clone();
        let task = Task::read(move |conn| work(&accessor, conn));
        self.submit(task, label, listener)
    }

    fn submit<T: Send + 'static>(
        &self,
        task: Task<T>,
        label: &'static str,
        listener: Option<Listener<T>>,
    ) -> Result<(), SchedulerError> {
        tracing::debug!(table = self.accessor.table(), operation = label, "Scheduling");
        self.db
            .scheduler()
            .submit(task.named(label).with_optional_listener(listener))
    }
}

impl<C: RecordCodec> std::fmt::Debug for Table<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("table", &self.accessor.table())
            .finish_non_exhaustive()
    }
}
