//! Concurrency scheduler.
//!
//! Two pools run every database task:
//! - A serial pool: one writer thread owning the writer connection. Tasks
//!   run strictly one at a time, in submission order.
//! - A concurrent pool: reader threads drawing read-only connections from
//!   a [`ReaderPool`]. Only started when WAL is enabled; otherwise reads
//!   share the serial pool.
//!
//! Each task runs inside its own transaction, committed only when the work
//! returns `Ok`. Results reach listeners through a [`DeliveryContext`].

pub mod delivery;
pub mod task;

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use rusqlite::{Connection, TransactionBehavior};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::storage::reader::ReaderPool;
use crate::storage::StorageError;

pub use delivery::{Callback, DeliveryContext, DeliveryQueue, DeliveryThread, Immediate};
pub use task::{Affinity, Listener, Task};

use task::{Completion, Work};

/// Errors from the scheduler itself, as opposed to task failures.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker thread panicked")]
    ThreadPanic,

    #[error("task panicked")]
    TaskPanic,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A task erased to what a worker needs: a connection, or the reason
/// there is none.
type Job = Box<dyn FnOnce(Result<&mut Connection, StorageError>) + Send>;

/// Serial and concurrent worker pools plus the delivery context.
pub struct Scheduler {
    wal_enabled: bool,
    serial: Mutex<Option<Sender<Job>>>,
    concurrent: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    delivery: Arc<dyn DeliveryContext>,
}

impl Scheduler {
    /// Start the worker threads.
    ///
    /// `writer` becomes the serial pool's connection. Passing `readers`
    /// starts `reader_threads` concurrent workers and marks the database as
    /// WAL-enabled; without it every task runs on the serial pool.
    pub fn start(
        writer: Connection,
        readers: Option<ReaderPool>,
        reader_threads: usize,
        delivery: Arc<dyn DeliveryContext>,
    ) -> Result<Self, SchedulerError> {
        let wal_enabled = readers.is_some();
        let mut workers = Vec::new();

        let (serial_tx, serial_rx) = mpsc::channel::<Job>();
        workers.push(spawn_writer(writer, serial_rx)?);

        let concurrent = match readers {
            Some(pool) => {
                let state = pool.state();
                tracing::debug!(
                    connections = state.connections,
                    idle = state.idle_connections,
                    "Reader pool ready"
                );
                let (tx, rx) = mpsc::channel::<Job>();
                let rx = Arc::new(Mutex::new(rx));
                for index in 0..reader_threads.max(1) {
                    workers.push(spawn_reader(index, pool.clone(), rx.clone())?);
                }
                Some(tx)
            }
            None => None,
        };

        tracing::info!(
            wal_enabled,
            reader_threads = if wal_enabled { reader_threads.max(1) } else { 0 },
            "Scheduler started"
        );

        Ok(Self {
            wal_enabled,
            serial: Mutex::new(Some(serial_tx)),
            concurrent: Mutex::new(concurrent),
            workers: Mutex::new(workers),
            delivery,
        })
    }

    /// Whether reads run on the concurrent pool.
    pub fn wal_enabled(&self) -> bool {
        self.wal_enabled
    }

    /// Submit a task to the pool its affinity names.
    ///
    /// Concurrent tasks fall back to the serial pool when WAL is off.
    pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> Result<(), SchedulerError> {
        let concurrent = task.affinity == Affinity::Concurrent && self.wal_enabled;
        let (behavior, sender) = if concurrent {
            (TransactionBehavior::Deferred, &self.concurrent)
        } else {
            (self.serial_behavior(), &self.serial)
        };

        tracing::trace!(
            task = task.label,
            concurrent,
            listener = task.has_listener(),
            "Submitting task"
        );
        let job = self.package(task, behavior);
        let guard = lock(sender);
        let sender = guard.as_ref().ok_or(SchedulerError::ShutDown)?;
        sender.send(job).map_err(|_| SchedulerError::ShutDown)
    }

    /// Submit to the serial pool.
    pub fn submit_write<T, F>(&self, work: F, listener: Option<Listener<T>>) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        self.submit(Task::write(work).with_optional_listener(listener))
    }

    /// Submit to the concurrent pool, or the serial pool when WAL is off.
    pub fn submit_read<T, F>(&self, work: F, listener: Option<Listener<T>>) -> Result<(), SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        self.submit(Task::read(work).with_optional_listener(listener))
    }

    /// Run `task` and wait for its result on the calling thread.
    ///
    /// Bypasses the delivery context, so it is safe to call from the thread
    /// that drains a [`DeliveryQueue`]. Must not be called from a worker.
    pub fn run_blocking<T: Send + 'static>(&self, task: Task<T>) -> Result<T, SchedulerError> {
        let (tx, rx) = mpsc::channel();
        self.submit(task.with_reply(Box::new(move |result| {
            let _ = tx.send(result);
        })))?;
        rx.recv().map_err(|_| SchedulerError::ShutDown)?
    }

    /// Run `task` and await its result without blocking the runtime.
    pub fn run_async<T: Send + 'static>(
        &self,
        task: Task<T>,
    ) -> impl Future<Output = Result<T, SchedulerError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let submitted = self.submit(task.with_reply(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        async move {
            submitted?;
            rx.await.map_err(|_| SchedulerError::ShutDown)?
        }
    }

    /// Stop accepting tasks, finish queued ones and join every worker.
    ///
    /// Idempotent. Listeners already posted to the delivery context still run.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        drop(lock(&self.serial).take());
        drop(lock(&self.concurrent).take());

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        if workers.is_empty() {
            return Ok(());
        }

        let mut panicked = false;
        for handle in workers {
            if handle.thread().id() == thread::current().id() {
                tracing::warn!("Scheduler shut down from its own worker, skipping join");
                continue;
            }
            panicked |= handle.join().is_err();
        }

        tracing::info!("Scheduler stopped");
        if panicked {
            Err(SchedulerError::ThreadPanic)
        } else {
            Ok(())
        }
    }

    fn serial_behavior(&self) -> TransactionBehavior {
        if self.wal_enabled {
            TransactionBehavior::Immediate
        } else {
            TransactionBehavior::Exclusive
        }
    }

    fn package<T: Send + 'static>(&self, task: Task<T>, behavior: TransactionBehavior) -> Job {
        let delivery = self.delivery.clone();
        Box::new(move |conn: Result<&mut Connection, StorageError>| {
            let Task {
                work,
                completion,
                label,
                ..
            } = task;

            let result = match conn {
                Ok(conn) => run_in_transaction(conn, behavior, label, work),
                Err(err) => {
                    tracing::error!(task = label, error = %err, "No connection for task");
                    Err(err.into())
                }
            };

            match completion {
                Completion::Discard => {}
                Completion::Listener(listener) => {
                    let value = result.ok();
                    delivery.post(Box::new(move || listener(value)));
                }
                Completion::Reply(reply) => reply(result),
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(error = %err, "Scheduler shutdown failed");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("wal_enabled", &self.wal_enabled)
            .field("workers", &lock(&self.workers).len())
            .finish_non_exhaustive()
    }
}

/// Run `work` in a transaction, committing only on success.
///
/// A failed or panicking task rolls back when the transaction drops.
fn run_in_transaction<T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    label: &'static str,
    work: Work<T>,
) -> Result<T, SchedulerError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<T, StorageError> {
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }));

    match outcome {
        Ok(Ok(value)) => {
            tracing::trace!(task = label, "Task committed");
            Ok(value)
        }
        Ok(Err(err)) => {
            tracing::error!(task = label, error = %err, "Task failed, transaction rolled back");
            Err(err.into())
        }
        Err(_) => {
            tracing::error!(task = label, "Task panicked, transaction rolled back");
            Err(SchedulerError::TaskPanic)
        }
    }
}

fn spawn_writer(conn: Connection, jobs: Receiver<Job>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("runnel-writer".into())
        .spawn(move || {
            let mut conn = conn;
            tracing::debug!("Writer thread started");
            for job in jobs {
                job(Ok(&mut conn));
            }
            tracing::debug!("Writer thread stopped");
        })
}

fn spawn_reader(
    index: usize,
    pool: ReaderPool,
    jobs: Arc<Mutex<Receiver<Job>>>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("runnel-reader-{index}"))
        .spawn(move || {
            tracing::debug!(reader = index, "Reader thread started");
            loop {
                // Lock only while dequeuing so other readers can pick up work.
                let next = lock(&jobs).recv();
                let Ok(job) = next else { break };
                match pool.get() {
                    Ok(mut conn) => job(Ok(&mut *conn)),
                    Err(err) => job(Err(err)),
                }
            }
            tracing::debug!(reader = index, "Reader thread stopped");
        })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
