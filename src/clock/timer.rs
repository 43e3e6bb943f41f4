//! Timer service on a dedicated thread

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, trace};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::clock::{TimerCallback, TimerHandle, TimerService};
use crate::events::panic_message;
use crate::utils::error::{IntoPresenterError, Result};

enum Wake {
    Rescan,
    Shutdown,
}

type Pending = BTreeMap<TimerHandle, (Instant, TimerCallback)>;

/// [`TimerService`] running callbacks on one worker thread
pub struct ThreadTimer {
    pending: Arc<Mutex<Pending>>,
    wake: Sender<Wake>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl ThreadTimer {
    /// Start the timer thread
    pub fn new() -> Result<Self> {
        let pending = Arc::new(Mutex::new(Pending::new()));
        let (wake, receiver) = unbounded();

        let worker_pending = Arc::clone(&pending);
        let worker = thread::Builder::new()
            .name("presenter-timer".to_string())
            .spawn(move || run_timer(worker_pending, receiver))
            .internal_err("Failed to start timer thread")?;

        Ok(Self {
            pending,
            wake,
            worker: Mutex::new(Some(worker)),
            next_handle: AtomicU64::new(1),
        })
    }

    /// Number of timers not yet fired
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Stop the worker; pending timers are dropped without firing
    pub fn shutdown(&self) {
        let _ = self.wake.send(Wake::Shutdown);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
        self.pending.lock().clear();
    }
}

impl TimerService for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle> {
        let handle = TimerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.pending
            .lock()
            .insert(handle, (Instant::now() + delay, callback));

        let sent = self.wake.send(Wake::Rescan).clock_err("Timer thread has stopped");
        if sent.is_err() {
            self.pending.lock().remove(&handle);
        }
        sent?;
        trace!("Timer {:?} armed for {:?}", handle, delay);
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.pending.lock().remove(&handle).is_some()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn run_timer(pending: Arc<Mutex<Pending>>, receiver: Receiver<Wake>) {
    loop {
        let next_deadline = pending.lock().values().map(|(deadline, _)| *deadline).min();

        let message = match next_deadline {
            Some(deadline) => {
                receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Wake::Rescan) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Wake::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        let due: Vec<TimerCallback> = {
            let mut pending = pending.lock();
            let expired: Vec<TimerHandle> = pending
                .iter()
                .filter(|(_, (deadline, _))| *deadline <= now)
                .map(|(handle, _)| *handle)
                .collect();
            expired
                .into_iter()
                .filter_map(|handle| pending.remove(&handle).map(|(_, callback)| callback))
                .collect()
        };

        // Callbacks run without the map lock so they can re-arm
        for callback in due {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                error!("Timer callback panicked: {}", panic_message(&panic));
            }
        }
    }
    debug!("Timer thread exiting");
}
