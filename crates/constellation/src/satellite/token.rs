// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cancellation token handed to run workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Signals a running `do_run` handler to exit. The handler must return
/// within the stop grace period after the token fires.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep until cancelled or the timeout elapses; returns whether the
    /// token has fired. Run loops use this as their pacing primitive.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let mut guard = self.inner.mutex.lock();
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.condvar.wait_for(&mut guard, timeout);
        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let fired = waiter.wait_timeout(Duration::from_secs(10));
            (fired, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
        let (fired, elapsed) = handle.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_without_cancel() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(!token.is_cancelled());
    }
}
