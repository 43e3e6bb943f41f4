//! Serial task queue
//!
//! One worker thread drains a channel of boxed closures in FIFO order. Used
//! for event delivery and for timer wake-ups that must not run on the
//! caller's stack.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::utils::error::{IntoPresenterError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Shutdown,
}

/// Single-threaded FIFO executor
pub struct TaskQueue {
    name: String,
    sender: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    closed: AtomicBool,
}

impl TaskQueue {
    /// Start a queue with its own named worker thread
    pub fn new(name: &str) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(&thread_name, receiver))
            .internal_err("Failed to start task queue thread")?;
        let worker_id = worker.thread().id();

        Ok(Self {
            name: name.to_string(),
            sender,
            worker: Mutex::new(Some(worker)),
            worker_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a task
    ///
    /// # Returns
    ///
    /// Returns false if the queue has shut down; the task is dropped
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.sender.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Wait until every task posted before this call has run
    ///
    /// # Returns
    ///
    /// Returns false on timeout or if the queue is shut down
    pub fn sync(&self, timeout: Duration) -> bool {
        if thread::current().id() == self.worker_id {
            return true;
        }
        let (done_tx, done_rx) = bounded(1);
        if !self.post(move || {
            let _ = done_tx.send(());
        }) {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Whether the worker thread is the caller
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, run the ones already queued and join the worker
    ///
    /// Called from the worker itself, the join is skipped.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(Message::Shutdown);

        if self.is_current() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Task queue {} worker exited abnormally", self.name);
            }
        }
        debug!("Task queue {} shut down", self.name);
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

fn run_worker(name: &str, receiver: Receiver<Message>) {
    for message in receiver {
        match message {
            Message::Run(task) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    error!("Task on {} panicked: {}", name, panic_message(&panic));
                }
            }
            Message::Shutdown => break,
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
