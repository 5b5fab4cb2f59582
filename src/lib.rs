//! Runnel: an embedded SQLite access layer.
//!
//! Applications describe their entities with a [`RecordCodec`], register an
//! accessor per codec and issue CRUD operations through a [`Table`]. Every
//! operation runs as a transactional task on a scheduler that serializes
//! writes on one thread and, when the database runs in WAL mode, serves
//! reads from a pool of read-only connections in parallel.
//!
//! # Architecture
//!
//! - **Single writer**: one thread owns the write connection; tasks commit
//!   in submission order
//! - **Concurrent reads**: WAL-gated reader threads over an r2d2 pool
//! - **Versioned schema**: creation and numbered upgrade scripts applied
//!   atomically, tracked in `PRAGMA user_version`
//! - **Listener delivery**: results are posted to a host-chosen context
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`database`]: The database context and table surface
//! - [`observability`]: Tracing setup
//! - [`registry`]: Codec-keyed accessor cache
//! - [`scheduler`]: Serial and concurrent worker pools
//! - [`storage`]: Script parsing, migrations, accessors and connections

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // storage::StorageError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::cast_possible_truncation,   // Pool sizes fit in usize
    clippy::cast_sign_loss,             // COUNT(*) is never negative
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use config::Config;
pub use database::{Database, Table};
pub use error::{ConfigurationError, Error, Result};
pub use registry::AccessorRegistry;
pub use scheduler::{
    Affinity, DeliveryContext, DeliveryQueue, DeliveryThread, Immediate, Listener, Scheduler,
    SchedulerError, Task,
};
pub use storage::accessor::{ConflictPolicy, Fields, Filter, Query, RecordAccessor, RecordCodec};
pub use storage::migrate::{MigrationEngine, MigrationError, SchemaChange};
pub use storage::script::{parse_script, split_statements, ParseError};
pub use storage::source::{DirSource, MemorySource, ScriptSource};
pub use storage::StorageError;
