// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Per-peer address-handle cache
//!
//! Every peer link address gets at most one address handle, created lazily
//! on the first send to that peer and destroyed when the owning transport
//! context is torn down. The cache is an owned component of the context,
//! never process-wide state.

use std::sync::Arc;

use dashmap::DashMap;

use crate::transport::verbs::{AddressVector, AhId, DatagramQp};
use crate::Result;

/// Lazily-populated map of peer address -> address handle.
pub struct AhCache {
    qp: Arc<dyn DatagramQp>,
    handles: DashMap<AddressVector, AhId>,
}

impl AhCache {
    /// Create an empty cache backed by the CM queue pair.
    pub fn new(qp: Arc<dyn DatagramQp>) -> Self {
        Self { qp, handles: DashMap::new() }
    }

    /// Return the cached handle for `peer`, creating one on first use.
    ///
    /// Two threads racing on the same uncached peer both reach the host's
    /// `create_ah`; the loser's handle is destroyed immediately so the
    /// one-per-peer invariant holds.
    pub fn get_or_create(&self, peer: &AddressVector) -> Result<AhId> {
        if let Some(entry) = self.handles.get(peer) {
            return Ok(*entry);
        }
        let created = self.qp.create_ah(peer)?;
        match self.handles.entry(*peer) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                self.qp.destroy_ah(created);
                Ok(*existing.get())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                log::debug!("[AH] created handle {:?} for peer {}", created, peer);
                slot.insert(created);
                Ok(created)
            }
        }
    }

    /// Number of live cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Destroy every cached handle. Called once at context teardown.
    pub fn clear(&self) {
        let peers: Vec<AddressVector> = self.handles.iter().map(|e| *e.key()).collect();
        for peer in peers {
            if let Some((_, ah)) = self.handles.remove(&peer) {
                self.qp.destroy_ah(ah);
            }
        }
    }
}

impl Drop for AhCache {
    fn drop(&mut self) {
        self.clear();
    }
}
