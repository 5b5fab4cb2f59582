//! Delivery contexts: where listener callbacks run.
//!
//! Workers never call listeners themselves. They post a callback onto the
//! context supplied at startup, so listeners run on a thread the host
//! controls, in the order their tasks completed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A posted listener invocation.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Somewhere listener callbacks can be posted.
pub trait DeliveryContext: Send + Sync {
    fn post(&self, callback: Callback);
}

/// Runs callbacks inline on the posting worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl DeliveryContext for Immediate {
    fn post(&self, callback: Callback) {
        run_callback(callback);
    }
}

/// A dedicated thread running callbacks in posting order.
pub struct DeliveryThread {
    sender: Mutex<Option<Sender<Callback>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryThread {
    /// Spawn the delivery thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Callback>();
        let handle = thread::Builder::new()
            .name("runnel-delivery".into())
            .spawn(move || {
                for callback in receiver {
                    run_callback(callback);
                }
                tracing::debug!("Delivery thread stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting callbacks, run the ones already posted and join.
    pub fn shutdown(&self) {
        drop(lock(&self.sender).take());
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        // Dropped from one of its own callbacks: let it finish on its own.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Delivery thread panicked");
        }
    }
}

impl DeliveryContext for DeliveryThread {
    fn post(&self, callback: Callback) {
        let sent = lock(&self.sender)
            .as_ref()
            .is_some_and(|sender| sender.send(callback).is_ok());
        if !sent {
            tracing::warn!("Delivery thread stopped, dropping callback");
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DeliveryThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryThread")
            .field("running", &lock(&self.sender).is_some())
            .finish()
    }
}

/// A queue drained explicitly by the host, e.g. from its event loop.
pub struct DeliveryQueue {
    sender: Mutex<Sender<Callback>>,
    receiver: Mutex<Receiver<Callback>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    /// Run every callback posted so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Released before running so callbacks may post again.
            let next = lock(&self.receiver).try_recv();
            match next {
                Ok(callback) => {
                    run_callback(callback);
                    ran += 1;
                }
                Err(_) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for one callback and run it.
    pub fn wait_and_run(&self, timeout: Duration) -> bool {
        let next = lock(&self.receiver).recv_timeout(timeout);
        match next {
            Ok(callback) => {
                run_callback(callback);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryContext for DeliveryQueue {
    fn post(&self, callback: Callback) {
        // The queue owns its receiver, so sending cannot fail.
        let _ = lock(&self.sender).send(callback);
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue").finish_non_exhaustive()
    }
}

fn run_callback(callback: Callback) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("Listener panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
