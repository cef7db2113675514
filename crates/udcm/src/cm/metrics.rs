// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM counters
//!
//! Relaxed atomics updated from the dispatch thread and consumer threads;
//! consumers only need monotonic snapshots for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking CM protocol activity for one transport context.
#[derive(Debug, Default)]
pub struct CmMetrics {
    /// Inbound REQs that spawned a new passive object.
    pub requests_received: AtomicU64,
    /// Inbound REQs suppressed as duplicates of a live object.
    pub duplicates_suppressed: AtomicU64,
    /// Datagrams dropped by the decoder (bad version, size, opcode).
    pub malformed_dropped: AtomicU64,
    /// Well-formed messages dropped for want of a matching object or a
    /// valid (state, event) pair.
    pub stale_dropped: AtomicU64,
    /// Messages resent by the retry engine.
    pub resends: AtomicU64,
    /// REJ_USER + REJ_CM messages sent.
    pub rejects_sent: AtomicU64,
    /// Reply-phase retry budgets exhausted.
    pub exhaustions: AtomicU64,
    /// Upcalls delivered to the event sink.
    pub upcalls_delivered: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmMetricsSnapshot {
    pub requests_received: u64,
    pub duplicates_suppressed: u64,
    pub malformed_dropped: u64,
    pub stale_dropped: u64,
    pub resends: u64,
    pub rejects_sent: u64,
    pub exhaustions: u64,
    pub upcalls_delivered: u64,
}

impl CmMetrics {
    /// Create a zeroed metrics struct.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter.
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter without synchronization penalties.
    #[must_use]
    pub fn snapshot(&self) -> CmMetricsSnapshot {
        CmMetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            rejects_sent: self.rejects_sent.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
            upcalls_delivered: self.upcalls_delivered.load(Ordering::Relaxed),
        }
    }
}
