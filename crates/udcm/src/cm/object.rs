// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! The per-attempt CM object and its consumer-facing handles
//!
//! One `CmObject` tracks one connection attempt (or one listener) from
//! creation to reclamation. Liveness is `Arc`: the live-object table and
//! any consumer handles share ownership, so no message or timer path can
//! ever reach freed memory. A `Destroy`-marked object stops matching
//! inbound traffic immediately and is removed from the table only by the
//! dispatch thread's sweep.
//!
//! Lock order: table -> object -> ring. The object lock is never held
//! across an upcall.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::cm::state::CmState;
use crate::protocol::CmMessage;
use crate::transport::verbs::{AddressVector, AhId, DataPathQp};

/// Mutable per-attempt state, guarded by the object lock.
pub struct CmInner {
    /// Current lifecycle state; every change goes through `CmState::apply`.
    pub state: CmState,
    /// Peer's CM port once known (REP's source port, or REQ's for passive).
    pub peer_port: u16,
    /// Peer's CM UD queue-pair number (duplicate-matching identity).
    pub peer_cm_qpn: u32,
    /// Peer's link address.
    pub peer_addr: AddressVector,
    /// Peer's data-path QPN carried in REQ/REP.
    pub peer_qpn: u32,
    /// Cached address handle for the peer (owned by the context's AhCache).
    pub ah: Option<AhId>,
    /// The connection's data-path queue pair, supplied on connect/accept.
    pub data_qp: Option<Arc<dyn DataPathQp>>,
    /// Last sent wire message; the retry engine resends it verbatim.
    pub msg: Option<CmMessage>,
    /// Resends so far in the current phase.
    pub retries: u32,
    /// When the current phase's message last went out.
    pub last_sent: Option<Instant>,
    /// Private data received from the peer (REQ at the passive side,
    /// REP/REJ at the active side), surfaced through upcalls.
    pub recv_pdata: Vec<u8>,
}

/// One connection attempt, listener, or inbound request.
pub struct CmObject {
    /// Local CM port this object answers on. Immutable for the lifetime
    /// of the object so demux never needs the lock for the first key.
    local_port: u16,
    /// Whether this object owns its port registry bit (listeners and
    /// active attempts do; passive spawns share the listener's port).
    owns_port: bool,
    inner: Mutex<CmInner>,
}

impl CmObject {
    /// Create an object in `Idle`, before activation.
    pub fn new(local_port: u16, owns_port: bool) -> Arc<Self> {
        Arc::new(Self {
            local_port,
            owns_port,
            inner: Mutex::new(CmInner {
                state: CmState::Idle,
                peer_port: 0,
                peer_cm_qpn: 0,
                peer_addr: AddressVector::default(),
                peer_qpn: 0,
                ah: None,
                data_qp: None,
                msg: None,
                retries: 0,
                last_sent: None,
                recv_pdata: Vec::new(),
            }),
        })
    }

    /// Local CM port.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Whether reclamation must release the port registry bit.
    #[must_use]
    pub fn owns_port(&self) -> bool {
        self.owns_port
    }

    /// Acquire the object lock.
    pub fn lock(&self) -> MutexGuard<'_, CmInner> {
        self.inner.lock()
    }

    /// Snapshot the state without holding the lock beyond the read.
    #[must_use]
    pub fn state(&self) -> CmState {
        self.inner.lock().state
    }
}

impl std::fmt::Debug for CmObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "cm[{} {:?} peer={}:{}]",
            self.local_port, inner.state, inner.peer_addr, inner.peer_port
        )
    }
}

impl CmInner {
    /// Begin a new reply-expecting phase: arm the retry engine.
    pub fn arm_phase(&mut self) {
        self.retries = 0;
        self.last_sent = Some(Instant::now());
    }

    /// Record a resend of the current phase's message.
    pub fn note_resend(&mut self) {
        self.retries += 1;
        self.last_sent = Some(Instant::now());
    }
}

// ============================================================================
// Consumer-facing handles
// ============================================================================

/// Handle for one connection (active attempt or accepted request).
#[derive(Clone)]
pub struct Connection {
    pub(crate) obj: Arc<CmObject>,
}

/// Handle for an inbound connection request awaiting accept/reject.
#[derive(Clone)]
pub struct ConnRequest {
    pub(crate) obj: Arc<CmObject>,
}

/// Handle for a passive service point.
#[derive(Clone)]
pub struct Listener {
    pub(crate) obj: Arc<CmObject>,
}

impl Connection {
    /// The peer's link address, once known.
    #[must_use]
    pub fn remote_address(&self) -> AddressVector {
        self.obj.lock().peer_addr
    }

    /// Local CM port of this attempt.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.obj.local_port()
    }

    /// Whether two handles refer to the same attempt.
    #[must_use]
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.obj, &other.obj)
    }
}

impl ConnRequest {
    /// The requesting peer's link address.
    #[must_use]
    pub fn remote_address(&self) -> AddressVector {
        self.obj.lock().peer_addr
    }
}

impl Listener {
    /// Service id this listener answers on.
    #[must_use]
    pub fn service_id(&self) -> u16 {
        self.obj.local_port()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({:?})", self.obj)
    }
}

impl std::fmt::Debug for ConnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnRequest({:?})", self.obj)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener(service={})", self.obj.local_port())
    }
}
