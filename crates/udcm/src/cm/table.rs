// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Live CM object table
//!
//! The arena of every live attempt, listener, and inbound request for one
//! transport context. Consumer threads insert and look up; only the
//! dispatch thread's `sweep` removes entries, and only entries already
//! marked `Destroy` — the mark-then-sweep split is what guarantees a
//! message or timer path never races with reclamation.
//!
//! Inbound demux identity is (local port, peer port, peer CM QPN): the
//! local port alone is not unique because every passive object spawned by
//! a listener shares the listener's service port.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cm::object::CmObject;
use crate::cm::state::CmState;

/// Coarse-locked list of live CM objects (one per transport context).
pub struct CmTable {
    objects: Mutex<Vec<Arc<CmObject>>>,
}

impl CmTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self { objects: Mutex::new(Vec::new()) }
    }

    /// Add a freshly created object.
    pub fn insert(&self, obj: Arc<CmObject>) {
        self.objects.lock().push(obj);
    }

    /// Find the listener serving `port`, if any.
    pub fn match_listener(&self, port: u16) -> Option<Arc<CmObject>> {
        self.objects
            .lock()
            .iter()
            .find(|obj| obj.local_port() == port && obj.state() == CmState::Listen)
            .cloned()
    }

    /// Find the non-listener object addressed by an inbound message.
    ///
    /// Matches the full (local port, peer port, peer CM QPN) tuple;
    /// `Destroy`-marked objects never match.
    pub fn match_attempt(&self, local_port: u16, peer_port: u16, peer_cm_qpn: u32) -> Option<Arc<CmObject>> {
        self.objects
            .lock()
            .iter()
            .find(|obj| {
                if obj.local_port() != local_port {
                    return false;
                }
                let inner = obj.lock();
                inner.state != CmState::Listen
                    && inner.state != CmState::Destroy
                    && inner.peer_port == peer_port
                    && inner.peer_cm_qpn == peer_cm_qpn
            })
            .cloned()
    }

    /// Snapshot every live object (for the retry sweep, processed unlocked).
    pub fn snapshot(&self) -> Vec<Arc<CmObject>> {
        self.objects.lock().clone()
    }

    /// Remove reclaimable objects, invoking `reclaim` for each.
    ///
    /// Two things qualify: a `Destroy`-marked object, and a terminal
    /// object whose consumer handles are all gone (the table's `Arc` is
    /// the last one — the liveness count reached zero). Terminal objects
    /// with live handles stay matched so retransmitted teardown traffic
    /// keeps getting its idempotent reply.
    ///
    /// Called only from the dispatch thread.
    pub fn sweep<F: FnMut(&Arc<CmObject>)>(&self, mut reclaim: F) -> usize {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|obj| {
            let state = obj.state();
            let reclaimable =
                state == CmState::Destroy || (state.is_terminal() && Arc::strong_count(obj) == 1);
            if reclaimable {
                reclaim(obj);
            }
            !reclaimable
        });
        before - objects.len()
    }

    /// Drain everything regardless of state (context shutdown).
    pub fn drain(&self) -> Vec<Arc<CmObject>> {
        std::mem::take(&mut *self.objects.lock())
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

impl Default for CmTable {
    fn default() -> Self {
        Self::new()
    }
}
