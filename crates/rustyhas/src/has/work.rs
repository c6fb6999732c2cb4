//! Deferred work items and an optional worker thread to run them
//!
//! A [`DelayedWork`] only tracks *when* it should run; the owner decides
//! what running it means. The server polls its items through
//! `run_due_work`, either from the caller's own event loop or from a
//! [`WorkQueue`] thread.

use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkState {
    Idle,
    Scheduled(Instant),
    /// Executing; `next` holds a deadline submitted while running
    Running { next: Option<Instant> },
}

/// Wakes a worker waiting for the next deadline
#[derive(Debug, Default)]
pub struct WorkSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WorkSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiting worker
    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = true;
        self.cond.notify_all();
    }

    /// Block until notified or until `deadline` passes
    pub fn wait_until(&self, deadline: Option<Instant>) {
        let mut pending = self.pending.lock().unwrap();

        while !*pending {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self.cond.wait_timeout(pending, deadline - now).unwrap();
                    pending = guard;
                }
                None => {
                    pending = self.cond.wait(pending).unwrap();
                }
            }
        }

        *pending = false;
    }
}

/// A work item that runs once after a delay
#[derive(Debug)]
pub struct DelayedWork {
    state: Mutex<WorkState>,
    idle: Condvar,
    signal: Arc<WorkSignal>,
}

impl DelayedWork {
    pub fn new(signal: Arc<WorkSignal>) -> Self {
        Self {
            state: Mutex::new(WorkState::Idle),
            idle: Condvar::new(),
            signal,
        }
    }

    /// Schedule the item to run after `delay`, replacing any earlier deadline
    pub fn reschedule(&self, delay: Duration) {
        self.schedule_at(Instant::now() + delay);
    }

    /// Schedule the item to run at `at`, replacing any earlier deadline
    pub fn schedule_at(&self, at: Instant) {
        {
            let mut state = self.state.lock().unwrap();
            *state = match *state {
                WorkState::Idle | WorkState::Scheduled(_) => WorkState::Scheduled(at),
                WorkState::Running { .. } => WorkState::Running { next: Some(at) },
            };
        }

        self.signal.notify();
    }

    /// Cancel a scheduled run. Returns true if a run that had not started
    /// yet was cancelled; an executing run is left alone.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        match *state {
            WorkState::Scheduled(_) => {
                *state = WorkState::Idle;
                true
            }
            WorkState::Running { next: Some(_) } => {
                *state = WorkState::Running { next: None };
                true
            }
            _ => false,
        }
    }

    /// Cancel a scheduled run and wait for an executing run to finish
    pub fn cancel_sync(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        let cancelled = match *state {
            WorkState::Scheduled(_) => {
                *state = WorkState::Idle;
                true
            }
            WorkState::Running { next: Some(_) } => {
                *state = WorkState::Running { next: None };
                true
            }
            _ => false,
        };

        while matches!(*state, WorkState::Running { .. }) {
            trace!("Waiting for running work item");
            state = self.idle.wait(state).unwrap();
        }

        cancelled
    }

    /// Deadline of the next run, if any
    pub fn deadline(&self) -> Option<Instant> {
        match *self.state.lock().unwrap() {
            WorkState::Idle => None,
            WorkState::Scheduled(at) => Some(at),
            WorkState::Running { next } => next,
        }
    }

    /// Whether a run is scheduled and has not started
    pub fn is_scheduled(&self) -> bool {
        matches!(*self.state.lock().unwrap(), WorkState::Scheduled(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock().unwrap(), WorkState::Running { .. })
    }

    /// Move a due item to the running state. Returns false if nothing is due.
    pub fn begin_if_due(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();

        match *state {
            WorkState::Scheduled(at) if at <= now => {
                *state = WorkState::Running { next: None };
                true
            }
            _ => false,
        }
    }

    /// Mark a run finished, keeping any deadline submitted while it ran
    pub fn finish(&self) {
        {
            let mut state = self.state.lock().unwrap();
            *state = match *state {
                WorkState::Running { next: Some(at) } => WorkState::Scheduled(at),
                _ => WorkState::Idle,
            };
        }

        self.idle.notify_all();
        self.signal.notify();
    }
}

/// Worker thread that repeatedly runs due work
pub struct WorkQueue {
    running: Arc<AtomicBool>,
    signal: Arc<WorkSignal>,
    handle: Option<JoinHandle<()>>,
}

impl WorkQueue {
    /// Start a worker. `tick` runs everything due at the given instant and
    /// returns the next deadline.
    pub fn start<F>(name: &str, signal: Arc<WorkSignal>, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut(Instant) -> Option<Instant> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_signal = signal.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!("Work queue started");
            while thread_running.load(Ordering::Acquire) {
                let next = tick(Instant::now());
                thread_signal.wait_until(next);
            }
            debug!("Work queue stopped");
        })?;

        Ok(Self {
            running,
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.signal.notify();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
