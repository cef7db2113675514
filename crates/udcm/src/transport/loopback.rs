// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! In-process loopback fabric
//!
//! Implements the verbs capability traits over plain queues so two CM
//! transport contexts can handshake inside one process: integration tests,
//! demos, and anywhere real hardware is unavailable.
//!
//! Unreliable-datagram semantics are preserved: a datagram addressed to an
//! unregistered endpoint vanishes, a receiver with no posted credit drops
//! the datagram, and tests can inject drops and duplicates on the send
//! side to exercise the retry and duplicate-suppression paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::engine::wake::WakeNotifier;
use crate::transport::verbs::{
    AddressVector, AhId, AsyncEvent, DataPathQp, DatagramQp, RecvMsg,
};
use crate::{Error, Result};

/// One registered CM endpoint inside the fabric.
struct Endpoint {
    credits: SegQueue<u64>,
    inbox: SegQueue<(u64, Vec<u8>)>,
    notifier: Mutex<Option<Arc<WakeNotifier>>>,
    dropped_no_credit: AtomicU64,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            credits: SegQueue::new(),
            inbox: SegQueue::new(),
            notifier: Mutex::new(None),
            dropped_no_credit: AtomicU64::new(0),
        }
    }

    fn deliver(&self, data: Vec<u8>) {
        match self.credits.pop() {
            Some(wr_id) => {
                self.inbox.push((wr_id, data));
                if let Some(notifier) = self.notifier.lock().as_ref() {
                    notifier.notify();
                }
            }
            None => {
                // UD semantics: no posted receive buffer, datagram is gone.
                self.dropped_no_credit.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

struct FabricInner {
    endpoints: Mutex<HashMap<(u16, u32), Arc<Endpoint>>>,
}

/// Registry of in-process CM endpoints, addressable by (LID, CM QPN).
#[derive(Clone)]
pub struct LoopbackFabric {
    inner: Arc<FabricInner>,
}

impl LoopbackFabric {
    /// Create an empty fabric.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner { endpoints: Mutex::new(HashMap::new()) }),
        }
    }

    /// Register a CM queue pair at (`lid`, `qpn`) and return it.
    ///
    /// The GID is derived deterministically from the pair, link-local
    /// style, so two fabrics never collide by accident.
    pub fn create_qp(&self, lid: u16, qpn: u32) -> Arc<LoopbackQp> {
        let mut gid = [0u8; 16];
        gid[0] = 0xFE;
        gid[1] = 0x80;
        gid[10..12].copy_from_slice(&lid.to_be_bytes());
        gid[12..16].copy_from_slice(&qpn.to_be_bytes());
        let addr = AddressVector { lid, qpn, gid };

        let endpoint = Arc::new(Endpoint::new());
        self.inner.endpoints.lock().insert((lid, qpn), Arc::clone(&endpoint));

        Arc::new(LoopbackQp {
            fabric: Arc::clone(&self.inner),
            addr,
            me: endpoint,
            ahs: Mutex::new(HashMap::new()),
            next_ah: AtomicU64::new(1),
            send_completions: SegQueue::new(),
            async_events: SegQueue::new(),
            drop_next: AtomicUsize::new(0),
            dup_next: AtomicUsize::new(0),
            fail_ah: AtomicBool::new(false),
        })
    }

    /// Remove an endpoint; datagrams addressed to it vanish from then on.
    pub fn remove_qp(&self, lid: u16, qpn: u32) {
        self.inner.endpoints.lock().remove(&(lid, qpn));
    }
}

impl Default for LoopbackFabric {
    fn default() -> Self {
        Self::new()
    }
}

/// Loopback implementation of the CM datagram queue pair.
pub struct LoopbackQp {
    fabric: Arc<FabricInner>,
    addr: AddressVector,
    me: Arc<Endpoint>,
    ahs: Mutex<HashMap<u64, AddressVector>>,
    next_ah: AtomicU64,
    send_completions: SegQueue<u64>,
    async_events: SegQueue<AsyncEvent>,
    drop_next: AtomicUsize,
    dup_next: AtomicUsize,
    fail_ah: AtomicBool,
}

impl LoopbackQp {
    /// Drop the next `n` outbound datagrams on the floor.
    pub fn inject_drop(&self, n: usize) {
        self.drop_next.fetch_add(n, Ordering::SeqCst);
    }

    /// Deliver the next `n` outbound datagrams twice (retransmit double).
    pub fn inject_duplicate(&self, n: usize) {
        self.dup_next.fetch_add(n, Ordering::SeqCst);
    }

    /// Make the next `create_ah` calls fail (resource-exhaustion path).
    pub fn fail_ah_creation(&self, fail: bool) {
        self.fail_ah.store(fail, Ordering::SeqCst);
    }

    /// Queue an async device event for the dispatch loop to observe.
    pub fn push_async_event(&self, event: AsyncEvent) {
        self.async_events.push(event);
        if let Some(notifier) = self.me.notifier.lock().as_ref() {
            notifier.notify();
        }
    }

    /// Datagrams dropped at this endpoint for want of a receive credit.
    #[must_use]
    pub fn dropped_for_no_credit(&self) -> u64 {
        self.me.dropped_no_credit.load(Ordering::Relaxed)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DatagramQp for LoopbackQp {
    fn local_addr(&self) -> AddressVector {
        self.addr
    }

    fn set_notifier(&self, notifier: Arc<WakeNotifier>) {
        *self.me.notifier.lock() = Some(notifier);
    }

    fn create_ah(&self, peer: &AddressVector) -> Result<AhId> {
        if self.fail_ah.load(Ordering::SeqCst) {
            return Err(Error::AhCreateFailed("loopback: injected failure".into()));
        }
        let id = self.next_ah.fetch_add(1, Ordering::Relaxed);
        self.ahs.lock().insert(id, *peer);
        Ok(AhId(id))
    }

    fn destroy_ah(&self, ah: AhId) {
        self.ahs.lock().remove(&ah.0);
    }

    fn post_send(&self, ah: AhId, wr_id: u64, payload: &[u8]) -> Result<()> {
        let peer = *self
            .ahs
            .lock()
            .get(&ah.0)
            .ok_or_else(|| Error::PostFailed(format!("unknown address handle {:?}", ah)))?;

        let copies = if Self::take_one(&self.dup_next) { 2 } else { 1 };
        for _ in 0..copies {
            if Self::take_one(&self.drop_next) {
                log::debug!("[LOOPBACK] dropping datagram to {} (injected)", peer);
                continue;
            }
            let target = self.fabric.endpoints.lock().get(&(peer.lid, peer.qpn)).cloned();
            match target {
                Some(endpoint) => endpoint.deliver(payload.to_vec()),
                // Nobody home at that address: a UD datagram just vanishes.
                None => log::debug!("[LOOPBACK] no endpoint at {}, datagram lost", peer),
            }
        }

        self.send_completions.push(wr_id);
        if let Some(notifier) = self.me.notifier.lock().as_ref() {
            notifier.notify();
        }
        Ok(())
    }

    fn post_recv(&self, wr_id: u64) -> Result<()> {
        self.me.credits.push(wr_id);
        Ok(())
    }

    fn poll_send(&self, out: &mut Vec<u64>) -> usize {
        let before = out.len();
        while let Some(wr_id) = self.send_completions.pop() {
            out.push(wr_id);
        }
        out.len() - before
    }

    fn poll_recv(&self) -> Option<RecvMsg> {
        self.me.inbox.pop().map(|(wr_id, data)| RecvMsg { wr_id, data })
    }

    fn poll_async_event(&self) -> Option<AsyncEvent> {
        self.async_events.pop()
    }
}

// ============================================================================
// Data-path queue pair double
// ============================================================================

/// Observable data-path QP states, in programming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQpState {
    /// Freshly created, not yet programmed.
    Reset,
    /// Receive-capable (first programming phase done).
    Ready,
    /// Fully connected (second phase done).
    SendReady,
    /// Error/flush state after disconnect.
    Flushed,
}

/// Loopback stand-in for a connection's data-path queue pair.
///
/// Records the programming sequence so tests can assert the CM layer drove
/// the two-phase ready transition and the teardown flush.
pub struct LoopbackDataQp {
    qpn: u32,
    state: Mutex<DataQpState>,
    peer: Mutex<Option<(AddressVector, u32)>>,
    fail_next: AtomicBool,
}

impl LoopbackDataQp {
    /// Create a data-path QP double with the given QPN.
    #[must_use]
    pub fn new(qpn: u32) -> Arc<Self> {
        Arc::new(Self {
            qpn,
            state: Mutex::new(DataQpState::Reset),
            peer: Mutex::new(None),
            fail_next: AtomicBool::new(false),
        })
    }

    /// Make the next programming call fail (fatal local-failure path).
    pub fn fail_next_transition(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Current programmed state.
    #[must_use]
    pub fn state(&self) -> DataQpState {
        *self.state.lock()
    }

    /// Peer this QP was programmed at, once `to_ready` ran.
    #[must_use]
    pub fn programmed_peer(&self) -> Option<(AddressVector, u32)> {
        *self.peer.lock()
    }

    fn check_injected(&self, what: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::QpProgramFailed(format!("loopback: injected {} failure", what)));
        }
        Ok(())
    }
}

impl DataPathQp for LoopbackDataQp {
    fn qpn(&self) -> u32 {
        self.qpn
    }

    fn to_ready(&self, peer: &AddressVector, peer_qpn: u32) -> Result<()> {
        self.check_injected("to_ready")?;
        *self.peer.lock() = Some((*peer, peer_qpn));
        *self.state.lock() = DataQpState::Ready;
        Ok(())
    }

    fn to_send_ready(&self) -> Result<()> {
        self.check_injected("to_send_ready")?;
        let mut state = self.state.lock();
        if *state != DataQpState::Ready {
            return Err(Error::QpProgramFailed(format!(
                "to_send_ready from {:?}, expect Ready",
                *state
            )));
        }
        *state = DataQpState::SendReady;
        Ok(())
    }

    fn to_flush(&self) -> Result<()> {
        self.check_injected("to_flush")?;
        *self.state.lock() = DataQpState::Flushed;
        Ok(())
    }
}
