// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Level-triggered wake notification for the dispatch loop
//!
//! Replaces the classic self-pipe trick: consumer threads and the host's
//! completion path signal the dispatch thread through an atomic flag plus
//! a condvar. Semantics the CM layer depends on:
//!
//! - `notify()` never blocks, from any thread.
//! - Level-triggered: any number of signals before a wake coalesce into
//!   one; a signal is never lost, even if it lands just before `wait`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Coalescing wakeup primitive shared by producers and the dispatch thread.
#[derive(Debug, Default)]
pub struct WakeNotifier {
    pending: AtomicBool,
    guard: Mutex<()>,
    condvar: Condvar,
}

impl WakeNotifier {
    /// Create a new notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared notifier wrapped in `Arc`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Signal the dispatch thread. Never blocks; repeated signals coalesce.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        // The lock is only ever held momentarily around the wait itself,
        // so this cannot stall the signaling thread.
        let _held = self.guard.lock();
        self.condvar.notify_one();
    }

    /// Consume a pending signal without waiting.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }

    /// Park until a signal arrives or `timeout` elapses.
    ///
    /// Returns `true` when woken by a signal, `false` on timeout. A signal
    /// that raced in before the wait returns immediately.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }
        let mut held = self.guard.lock();
        // Re-check under the lock: a notify between the swap above and
        // acquiring the lock must not be slept through.
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }
        let _ = self.condvar.wait_for(&mut held, timeout);
        self.pending.swap(false, Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_signal_before_wait_returns_immediately() {
        let notifier = WakeNotifier::new();
        notifier.notify();

        let start = Instant::now();
        assert!(notifier.wait_timeout(Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_signals_coalesce() {
        let notifier = WakeNotifier::new();
        for _ in 0..10 {
            notifier.notify();
        }
        assert!(notifier.take_pending());
        assert!(!notifier.take_pending(), "second take sees no signal");
    }

    #[test]
    fn test_wait_times_out_without_signal() {
        let notifier = WakeNotifier::new();
        let start = Instant::now();
        assert!(!notifier.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_cross_thread_wake() {
        let notifier = WakeNotifier::shared();
        let remote = Arc::clone(&notifier);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.notify();
        });

        assert!(notifier.wait_timeout(Duration::from_millis(500)));
        handle.join().expect("join");
    }
}
