use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Two-state latch that lets a thread block until an asynchronous operation
/// has finished, either successfully or not. Reusable via [`CompletionSignal::clear`].
#[derive(Debug, Default)]
pub struct CompletionSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to pending. Idempotent.
    pub fn clear(&self) {
        *self.signaled.lock() = false;
    }

    /// Releases every current waiter; later waiters return immediately until the
    /// next [`clear`](Self::clear).
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
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

    /// Returns `true` if the signal was set before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if *signaled {
            return true;
        }
        self.cond
            .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
        *signaled
    }
}
