//! Blocking wait primitives used to serialize against in-flight work.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Manual-reset event.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new(signaled: bool) -> Self {
        Event {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    /// Returns false if the event was still clear when `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.cond.wait_for(&mut signaled, timeout);
        }
        *signaled
    }
}

/// Count of queued operations; waiters block until it drains to zero.
#[derive(Debug, Default)]
pub struct WorkCounter {
    pending: Mutex<usize>,
    cond: Condvar,
}

impl WorkCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> usize {
        let mut pending = self.pending.lock();
        *pending += 1;
        *pending
    }

    pub fn end(&self) -> usize {
        let mut pending = self.pending.lock();
        debug_assert!(*pending > 0, "work counter underflow");
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cond.notify_all();
        }
        *pending
    }

    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn wait_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.cond.wait(&mut pending);
        }
    }
}
