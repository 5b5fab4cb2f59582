//! Units of work handed to the scheduler.

use rusqlite::Connection;

use super::SchedulerError;
use crate::storage::StorageError;

/// Callback receiving a task result on the delivery context.
///
/// Called exactly once: `Some(result)` on success, `None` when the task
/// failed and its transaction was rolled back.
pub type Listener<T> = Box<dyn FnOnce(Option<T>) + Send>;

/// Work run inside the task's transaction.
pub(crate) type Work<T> = Box<dyn FnOnce(&Connection) -> Result<T, StorageError> + Send>;

/// Direct reply used by the blocking and async helpers.
pub(crate) type Reply<T> = Box<dyn FnOnce(Result<T, SchedulerError>) + Send>;

/// Which pool a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// The single writer thread.
    Serial,
    /// The reader threads, when WAL is enabled.
    Concurrent,
}

/// How a finished task reports back.
pub(crate) enum Completion<T> {
    Discard,
    Listener(Listener<T>),
    Reply(Reply<T>),
}

/// A unit of work plus where its result goes.
pub struct Task<T> {
    pub(crate) work: Work<T>,
    pub(crate) completion: Completion<T>,
    pub(crate) affinity: Affinity,
    pub(crate) label: &'static str,
}

impl<T: Send + 'static> Task<T> {
    /// A task for the serial (writer) pool.
    pub fn write<F>(work: F) -> Self
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        Self::new(Affinity::Serial, work)
    }

    /// A task for the concurrent (reader) pool.
    pub fn read<F>(work: F) -> Self
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        Self::new(Affinity::Concurrent, work)
    }

    fn new<F>(affinity: Affinity, work: F) -> Self
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            completion: Completion::Discard,
            affinity,
            label: "task",
        }
    }

    /// Deliver the result to `listener`.
    #[must_use]
    pub fn with_listener<L>(mut self, listener: L) -> Self
    where
        L: FnOnce(Option<T>) + Send + 'static,
    {
        self.completion = Completion::Listener(Box::new(listener));
        self
    }

    /// Deliver the result to `listener` if there is one.
    #[must_use]
    pub fn with_optional_listener(mut self, listener: Option<Listener<T>>) -> Self {
        self.completion = match listener {
            Some(listener) => Completion::Listener(listener),
            None => Completion::Discard,
        };
        self
    }

    /// Name used in log output.
    #[must_use]
    pub fn named(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub(crate) fn with_reply(mut self, reply: Reply<T>) -> Self {
        self.completion = Completion::Reply(reply);
        self
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn has_listener(&self) -> bool {
        matches!(self.completion, Completion::Listener(_))
    }
}

impl<T: Send + 'static> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label)
            .field("affinity", &self.affinity)
            .field("listener", &self.has_listener())
            .finish_non_exhaustive()
    }
}
