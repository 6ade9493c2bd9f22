//! Cooperative stop/pause control shared between a controller and its workers.
//!
//! # Overview
//!
//! [`WorkerControl`] carries a stop flag (an `AtomicBool`, checked at every
//! loop iteration) and a pause flag guarded by a `Mutex` + `Condvar` so that
//! paused workers sleep until resumed or stopped instead of spinning.
//!
//! # Example
//!
//! ```
//! use diskwarden::control::WorkerControl;
//! use std::time::Duration;
//!
//! let control = WorkerControl::new(Duration::from_millis(50));
//! assert!(control.checkpoint());
//! control.request_stop();
//! assert!(!control.checkpoint());
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Stop and pause flags for one worker group.
#[derive(Debug)]
pub struct WorkerControl {
    stop: AtomicBool,
    paused: Mutex<bool>,
    wake: Condvar,
    poll: Duration,
}

impl WorkerControl {
    /// Create a control block. `poll` bounds how long a paused worker sleeps
    /// before re-checking its flags.
    #[must_use]
    pub fn new(poll: Duration) -> Self {
        Self {
            stop: AtomicBool::new(false),
            paused: Mutex::new(false),
            wake: Condvar::new(),
            poll,
        }
    }

    /// Ask workers to stop and wake any that are paused.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _guard = self.lock_paused();
        self.wake.notify_all();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        *self.lock_paused() = true;
    }

    pub fn resume(&self) {
        *self.lock_paused() = false;
        self.wake.notify_all();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.lock_paused()
    }

    /// Block while paused.
    ///
    /// Returns `false` when a stop was requested, either before the call or
    /// while waiting; `true` when the worker may continue.
    pub fn checkpoint(&self) -> bool {
        let mut paused = self.lock_paused();
        loop {
            if self.is_stopped() {
                return false;
            }
            if !*paused {
                return true;
            }
            paused = match self.wake.wait_timeout(paused, self.poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock_paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

/// Readable text from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
