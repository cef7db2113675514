// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM transport context
//!
//! [`CmTransport`] is the per-device entry point: it owns the port
//! registry, the send/recv rings, the address-handle cache, the live
//! object table, and the dispatch thread. Consumer threads call the five
//! operations directly; the send side of each transition runs on the
//! caller's thread, and the wake notifier is signaled afterward so the
//! dispatch thread picks up retry bookkeeping for the new phase.
//!
//! All inbound protocol handling lives here too ([`CmCore::process_inbound`]
//! and the per-opcode handlers), invoked only from the dispatch thread so
//! transitions for one object are totally ordered. Upcalls fire with no
//! lock held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::cm::metrics::{CmMetrics, CmMetricsSnapshot};
use crate::cm::object::{CmInner, CmObject, ConnRequest, Connection, Listener};
use crate::cm::ports::PortRegistry;
use crate::cm::state::{CmEvent, CmState};
use crate::cm::table::CmTable;
use crate::config::CmConfig;
use crate::engine::{dispatch, wake::WakeNotifier};
use crate::events::ConnectionEventSink;
use crate::protocol::{CmMessage, CmOpcode, CM_MSG_LEN};
use crate::transport::ah_cache::AhCache;
use crate::transport::ring::CmRing;
use crate::transport::verbs::{AddressVector, DataPathQp, DatagramQp};
use crate::{Error, Result};

/// Per-device CM transport context.
///
/// Created once per device via [`CmTransport::start`]; dropping it (or
/// calling [`shutdown`](Self::shutdown)) stops the dispatch thread, drains
/// the object table, and destroys every cached address handle.
pub struct CmTransport {
    core: Arc<CmCore>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Everything the dispatch thread shares with consumer threads.
pub(crate) struct CmCore {
    pub(crate) config: CmConfig,
    pub(crate) qp: Arc<dyn DatagramQp>,
    pub(crate) ring: CmRing,
    pub(crate) ahs: AhCache,
    pub(crate) ports: PortRegistry,
    pub(crate) table: CmTable,
    pub(crate) metrics: CmMetrics,
    pub(crate) sink: Arc<dyn ConnectionEventSink>,
    pub(crate) wake: Arc<WakeNotifier>,
    pub(crate) shutdown: AtomicBool,
}

impl CmTransport {
    /// Bring up a transport context over the host-provided CM queue pair
    /// and spawn its dispatch thread.
    pub fn start(
        config: CmConfig,
        qp: Arc<dyn DatagramQp>,
        sink: Arc<dyn ConnectionEventSink>,
    ) -> Result<Arc<Self>> {
        let wake = WakeNotifier::shared();
        qp.set_notifier(Arc::clone(&wake));
        let ring = CmRing::new(Arc::clone(&qp), config.ring_depth)?;
        let ahs = AhCache::new(Arc::clone(&qp));

        let core = Arc::new(CmCore {
            config,
            qp,
            ring,
            ahs,
            ports: PortRegistry::new(),
            table: CmTable::new(),
            metrics: CmMetrics::new(),
            sink,
            wake,
            shutdown: AtomicBool::new(false),
        });

        let dispatcher = dispatch::spawn(Arc::clone(&core))?;
        Ok(Arc::new(Self {
            core,
            dispatcher: Mutex::new(Some(dispatcher)),
        }))
    }

    /// Begin active connection establishment toward `peer`'s `service_id`.
    ///
    /// Returns as soon as the REQ is on the wire; completion arrives
    /// through `on_connected`, `on_rejected`, or `on_unreachable`.
    pub fn connect(
        &self,
        peer: AddressVector,
        service_id: u16,
        data_qp: Arc<dyn DataPathQp>,
        private_data: &[u8],
    ) -> Result<Connection> {
        let core = &self.core;
        core.check_running()?;

        let mut msg = CmMessage::new(CmOpcode::Req);
        msg.set_private_data(private_data)?;

        let port = core.ports.allocate(0)?;
        let ah = match core.ahs.get_or_create(&peer) {
            Ok(ah) => ah,
            Err(e) => {
                core.ports.release(port);
                return Err(e);
            }
        };

        msg.sport = port;
        msg.dport = service_id;
        msg.sqpn = data_qp.qpn();
        msg.saddr = core.qp.local_addr();
        msg.daddr = peer;

        let obj = CmObject::new(port, true);
        {
            let mut inner = obj.lock();
            inner.state = CmState::Idle.apply(CmEvent::Connect).map_err(invalid)?;
            inner.peer_port = service_id;
            inner.peer_cm_qpn = peer.qpn;
            inner.peer_addr = peer;
            inner.ah = Some(ah);
            inner.data_qp = Some(data_qp);
            inner.msg = Some(msg);
            inner.arm_phase();
        }
        core.table.insert(Arc::clone(&obj));

        {
            let inner = obj.lock();
            if let Err(e) = core.send_stored(&inner) {
                drop(inner);
                // The attempt never reached the wire; hand the object to
                // the sweeper and surface the failure synchronously.
                let mut inner = obj.lock();
                inner.state = inner.state.apply(CmEvent::Free).unwrap_or(CmState::Destroy);
                drop(inner);
                core.wake.notify();
                return Err(e);
            }
        }

        log::debug!(
            "[CM] connect: port {} -> {} service {}",
            port,
            peer,
            service_id
        );
        core.wake.notify();
        Ok(Connection { obj })
    }

    /// Begin passive listening on `service_id` (0 picks a free port).
    pub fn listen(&self, service_id: u16) -> Result<Listener> {
        let core = &self.core;
        core.check_running()?;

        let port = core.ports.allocate(service_id)?;
        let obj = CmObject::new(port, true);
        {
            let mut inner = obj.lock();
            inner.state = CmState::Idle.apply(CmEvent::Listen).map_err(invalid)?;
        }
        core.table.insert(Arc::clone(&obj));
        log::debug!("[CM] listen: service {}", port);
        Ok(Listener { obj })
    }

    /// Accept an inbound connection request.
    ///
    /// Programs the data-path queue pair through both ready phases, sends
    /// REP with `private_data`, and awaits the peer's RTU. A programming
    /// failure is returned synchronously with the request left pending, so
    /// the consumer can still `reject` it.
    pub fn accept(
        &self,
        request: &ConnRequest,
        data_qp: Arc<dyn DataPathQp>,
        private_data: &[u8],
    ) -> Result<Connection> {
        let core = &self.core;
        core.check_running()?;

        let obj = Arc::clone(&request.obj);
        {
            let mut inner = obj.lock();
            if inner.state != CmState::AcceptPending {
                return Err(Error::InvalidState("accept requires a pending request"));
            }

            data_qp.to_ready(&inner.peer_addr, inner.peer_qpn)?;
            data_qp.to_send_ready()?;

            let mut msg = CmMessage::new(CmOpcode::Rep);
            msg.set_private_data(private_data)?;
            msg.sport = obj.local_port();
            msg.dport = inner.peer_port;
            msg.sqpn = data_qp.qpn();
            msg.dqpn = inner.peer_qpn;
            msg.saddr = core.qp.local_addr();
            msg.daddr = inner.peer_addr;

            inner.state = inner.state.apply(CmEvent::Accept).map_err(invalid)?;
            inner.data_qp = Some(data_qp);
            inner.msg = Some(msg);
            inner.arm_phase();
            if let Err(e) = core.send_stored(&inner) {
                // The REP never went out and the caller sees a hard
                // failure; the attempt must not quietly complete later.
                inner.state = inner.state.apply(CmEvent::LocalFailure).map_err(invalid)?;
                return Err(e);
            }
        }

        log::debug!("[CM] accept: service {} peer {}", obj.local_port(), request.remote_address());
        core.wake.notify();
        Ok(Connection { obj })
    }

    /// Reject an inbound connection request, optionally with consumer data.
    ///
    /// The REJ_USER is fire-and-forget; a retransmitted REQ after a lost
    /// reject simply surfaces a fresh request upcall.
    pub fn reject(&self, request: &ConnRequest, private_data: &[u8]) -> Result<()> {
        let core = &self.core;
        core.check_running()?;

        let obj = &request.obj;
        {
            let mut inner = obj.lock();
            if inner.state != CmState::AcceptPending {
                return Err(Error::InvalidState("reject requires a pending request"));
            }

            let mut msg = CmMessage::new(CmOpcode::RejUser);
            msg.set_private_data(private_data)?;
            msg.sport = obj.local_port();
            msg.dport = inner.peer_port;
            msg.dqpn = inner.peer_qpn;
            msg.saddr = core.qp.local_addr();
            msg.daddr = inner.peer_addr;

            inner.state = inner.state.apply(CmEvent::Reject).map_err(invalid)?;
            inner.msg = Some(msg);
            core.send_stored(&inner)?;
            CmMetrics::incr(&core.metrics.rejects_sent);

            // Nothing further is expected on this object; let the
            // dispatch thread reclaim it.
            inner.state = inner.state.apply(CmEvent::Free).map_err(invalid)?;
        }

        log::debug!("[CM] reject: service {}", obj.local_port());
        core.wake.notify();
        Ok(())
    }

    /// Begin teardown of an established connection.
    ///
    /// Flushes the data-path queue pair, sends DREQ, and retries until
    /// DREP arrives or the budget is exhausted — exhaustion completes the
    /// teardown as if acknowledged. Returns `Ok` without action when the
    /// peer already tore the connection down.
    pub fn disconnect(&self, conn: &Connection) -> Result<()> {
        let core = &self.core;
        core.check_running()?;

        let obj = &conn.obj;
        {
            let mut inner = obj.lock();
            match inner.state {
                // Peer-initiated teardown already completed (or is in
                // flight); the disconnected upcall has already fired.
                CmState::DreqPending | CmState::DreqReceived | CmState::Disconnected => {
                    return Ok(());
                }
                CmState::Connected => {}
                _ => return Err(Error::InvalidState("disconnect requires a connected object")),
            }

            if let Some(qp) = inner.data_qp.as_ref() {
                qp.to_flush()?;
            }

            let mut msg = CmMessage::new(CmOpcode::Dreq);
            msg.sport = obj.local_port();
            msg.dport = inner.peer_port;
            msg.dqpn = inner.peer_qpn;
            msg.saddr = core.qp.local_addr();
            msg.daddr = inner.peer_addr;

            inner.state = inner.state.apply(CmEvent::Disconnect).map_err(invalid)?;
            inner.msg = Some(msg);
            inner.arm_phase();
            if let Err(e) = core.send_stored(&inner) {
                // Teardown must complete regardless; the retry engine
                // resends the stored DREQ on its next pass.
                log::warn!("[CM] DREQ send failed, retry engine takes over: {}", e);
            }
        }

        log::debug!("[CM] disconnect: port {}", obj.local_port());
        core.wake.notify();
        Ok(())
    }

    /// Snapshot of the context's protocol counters.
    #[must_use]
    pub fn metrics(&self) -> CmMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Link address of the CM queue pair (what peers connect to).
    #[must_use]
    pub fn local_addr(&self) -> AddressVector {
        self.core.qp.local_addr()
    }

    /// Stop the dispatch thread and reclaim every live object.
    ///
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.core.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.wake.notify();
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                log::warn!("[CM] dispatch thread panicked during shutdown");
            }
        }

        for obj in self.core.table.drain() {
            let mut inner = obj.lock();
            if obj.owns_port() {
                self.core.ports.release(obj.local_port());
            }
            inner.state = inner.state.apply(CmEvent::Free).unwrap_or(CmState::Destroy);
        }
        self.core.ahs.clear();
        log::debug!("[CM] transport context shut down");
    }
}

impl Drop for CmTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn invalid(t: crate::cm::state::InvalidTransition) -> Error {
    log::warn!("[CM] {}", t);
    Error::InvalidState("protocol state does not permit this operation")
}

// ============================================================================
// Inbound path (dispatch thread only)
// ============================================================================

impl CmCore {
    fn check_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Encode and send the object's stored message. Caller holds the
    /// object lock; ring-slot acquisition never blocks on wire I/O.
    pub(crate) fn send_stored(&self, inner: &CmInner) -> Result<()> {
        let msg = inner.msg.as_ref().ok_or(Error::InvalidState("no message to send"))?;
        let ah = match inner.ah {
            Some(ah) => ah,
            None => self.ahs.get_or_create(&msg.daddr)?,
        };
        let mut buf = [0u8; CM_MSG_LEN];
        let len = msg.encode(&mut buf);
        self.ring.send(ah, &buf[..len])
    }

    /// Drain pending datagrams, bounded per iteration by the configured
    /// completion-queue size. Returns how many were handled.
    pub(crate) fn process_inbound(&self) -> usize {
        let mut handled = 0;
        while handled < self.config.cq_size {
            let Some(bytes) = self.ring.recv() else { break };
            handled += 1;
            match CmMessage::decode(&bytes) {
                Ok(msg) => self.dispatch_message(msg),
                Err(e) => {
                    CmMetrics::incr(&self.metrics.malformed_dropped);
                    log::warn!("[CM] dropping malformed datagram: {}", e);
                }
            }
        }
        handled
    }

    fn dispatch_message(&self, msg: CmMessage) {
        #[cfg(feature = "trace")]
        log::trace!(
            "[CM] rx {} sport={} dport={} from {}",
            msg.op,
            msg.sport,
            msg.dport,
            msg.saddr
        );
        match msg.op {
            CmOpcode::Req => self.handle_req(&msg),
            CmOpcode::Rep => self.handle_rep(&msg),
            CmOpcode::RejUser | CmOpcode::RejCm => self.handle_rej(&msg),
            CmOpcode::Rtu => self.handle_rtu(&msg),
            CmOpcode::Dreq => self.handle_dreq(&msg),
            CmOpcode::Drep => self.handle_drep(&msg),
        }
    }

    /// Inbound REQ: spawn a passive object under the matching listener,
    /// or suppress the retransmission duplicate.
    fn handle_req(&self, msg: &CmMessage) {
        if self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn).is_some() {
            // Datagram retransmission of a REQ we already surfaced; one
            // request upcall per attempt, no matter how often it lands.
            CmMetrics::incr(&self.metrics.duplicates_suppressed);
            log::debug!(
                "[CM] duplicate REQ suppressed: service {} peer {}:{}",
                msg.dport,
                msg.saddr,
                msg.sport
            );
            return;
        }

        let Some(listener) = self.table.match_listener(msg.dport) else {
            // Nobody listening on that service: tell the peer instead of
            // letting it retry into a timeout.
            log::debug!("[CM] REQ for unknown service {}, sending REJ_CM", msg.dport);
            self.send_protocol_reject(msg);
            return;
        };

        let ah = match self.ahs.get_or_create(&msg.saddr) {
            Ok(ah) => ah,
            Err(e) => {
                // Local resource failure of this attempt; the peer's REQ
                // retries will try again.
                log::warn!("[CM] dropping REQ, no address handle for {}: {}", msg.saddr, e);
                return;
            }
        };

        let obj = CmObject::new(msg.dport, false);
        let pdata;
        {
            let mut inner = obj.lock();
            match inner.state.apply(CmEvent::ReqRecv) {
                Ok(next) => inner.state = next,
                Err(t) => {
                    log::warn!("[CM] {}", t);
                    return;
                }
            }
            inner.peer_port = msg.sport;
            inner.peer_cm_qpn = msg.saddr.qpn;
            inner.peer_addr = msg.saddr;
            inner.peer_qpn = msg.sqpn;
            inner.ah = Some(ah);
            inner.recv_pdata = msg.private_data().to_vec();
            pdata = inner.recv_pdata.clone();
        }
        self.table.insert(Arc::clone(&obj));
        CmMetrics::incr(&self.metrics.requests_received);
        log::debug!(
            "[CM] REQ: service {} peer {}:{} qpn {:#x}",
            msg.dport,
            msg.saddr,
            msg.sport,
            msg.sqpn
        );

        self.deliver(|sink| {
            sink.on_connection_request(
                &Listener { obj: listener },
                ConnRequest { obj },
                &pdata,
            );
        });
    }

    /// Inbound REP: complete the active side of the handshake, or resend
    /// RTU when the peer missed the original.
    fn handle_rep(&self, msg: &CmMessage) {
        let Some(obj) = self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn) else {
            // Stale REP for an attempt we no longer track; answer with a
            // protocol reject so the peer stops resending.
            CmMetrics::incr(&self.metrics.stale_dropped);
            log::debug!("[CM] stale REP for port {}, sending REJ_CM", msg.dport);
            self.send_protocol_reject(msg);
            return;
        };

        let mut connected_pdata: Option<Vec<u8>> = None;
        let mut unreachable = false;
        {
            let mut inner = obj.lock();
            let prev = inner.state;
            let next = match prev.apply(CmEvent::RepRecv) {
                Ok(next) => next,
                Err(t) => {
                    CmMetrics::incr(&self.metrics.stale_dropped);
                    log::warn!("[CM] {}", t);
                    return;
                }
            };

            if prev == CmState::Connected {
                // Our RTU was lost; the stored message still is the RTU.
                if let Err(e) = self.send_stored(&inner) {
                    log::warn!("[CM] RTU resend failed: {}", e);
                }
                CmMetrics::incr(&self.metrics.resends);
                return;
            }

            // First REP for this attempt: adopt the peer's identity and
            // bring the data path up before acknowledging.
            inner.peer_addr = msg.saddr;
            inner.peer_qpn = msg.sqpn;
            inner.recv_pdata = msg.private_data().to_vec();

            let programmed = match inner.data_qp.as_ref() {
                Some(qp) => qp
                    .to_ready(&inner.peer_addr, inner.peer_qpn)
                    .and_then(|()| qp.to_send_ready()),
                None => Err(Error::InvalidState("no data-path QP bound")),
            };

            match programmed {
                Ok(()) => {
                    let mut rtu = CmMessage::new(CmOpcode::Rtu);
                    rtu.sport = obj.local_port();
                    rtu.dport = msg.sport;
                    rtu.saddr = self.qp.local_addr();
                    rtu.daddr = inner.peer_addr;
                    inner.msg = Some(rtu);
                    inner.state = next;
                    if let Err(e) = self.send_stored(&inner) {
                        // The connection is up either way; the peer's REP
                        // retries will trigger an RTU resend.
                        log::warn!("[CM] RTU send failed: {}", e);
                    }
                    connected_pdata = Some(inner.recv_pdata.clone());
                }
                Err(e) => {
                    log::warn!("[CM] data-path programming failed for port {}: {}", obj.local_port(), e);
                    match prev.apply(CmEvent::LocalFailure) {
                        Ok(next) => inner.state = next,
                        Err(t) => log::warn!("[CM] {}", t),
                    }
                    unreachable = true;
                }
            }
        }

        if let Some(pdata) = connected_pdata {
            log::debug!("[CM] connected: port {}", obj.local_port());
            self.deliver(|sink| sink.on_connected(&Connection { obj: Arc::clone(&obj) }, &pdata));
        } else if unreachable {
            self.deliver(|sink| sink.on_unreachable(&Connection { obj: Arc::clone(&obj) }));
        }
    }

    /// Inbound RTU: the active side acknowledged; the passive attempt is up.
    fn handle_rtu(&self, msg: &CmMessage) {
        let Some(obj) = self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn) else {
            CmMetrics::incr(&self.metrics.stale_dropped);
            log::debug!("[CM] stale RTU for port {} dropped", msg.dport);
            return;
        };

        {
            let mut inner = obj.lock();
            match inner.state.apply(CmEvent::RtuRecv) {
                Ok(next) => inner.state = next,
                Err(t) => {
                    // An RTU retransmission after we connected is noise.
                    CmMetrics::incr(&self.metrics.stale_dropped);
                    log::debug!("[CM] {}", t);
                    return;
                }
            }
        }

        log::debug!("[CM] connected (passive): service {}", obj.local_port());
        self.deliver(|sink| sink.on_connected(&Connection { obj: Arc::clone(&obj) }, &[]));
    }

    /// Inbound REJ_USER / REJ_CM: the attempt is dead; surface which kind.
    fn handle_rej(&self, msg: &CmMessage) {
        let Some(obj) = self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn) else {
            CmMetrics::incr(&self.metrics.stale_dropped);
            log::debug!("[CM] stale {} for port {} dropped", msg.op, msg.dport);
            return;
        };

        let pdata;
        {
            let mut inner = obj.lock();
            match inner.state.apply(CmEvent::RejRecv) {
                Ok(next) => inner.state = next,
                Err(t) => {
                    CmMetrics::incr(&self.metrics.stale_dropped);
                    log::warn!("[CM] {}", t);
                    return;
                }
            }
            pdata = match msg.op {
                CmOpcode::RejUser => Some(msg.private_data().to_vec()),
                _ => None,
            };
        }

        log::debug!("[CM] rejected: port {} ({})", obj.local_port(), msg.op);
        self.deliver(|sink| {
            sink.on_rejected(&Connection { obj: Arc::clone(&obj) }, pdata.as_deref());
        });
    }

    /// Inbound DREQ: flush, reply DREP, fire the disconnected upcall
    /// exactly once. Retransmissions after teardown only resend DREP.
    fn handle_dreq(&self, msg: &CmMessage) {
        let Some(obj) = self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn) else {
            // The attempt is already reclaimed; answering is harmless and
            // stops the peer's DREQ retries.
            log::debug!("[CM] DREQ for reclaimed port {}, answering DREP", msg.dport);
            self.send_drep_for(msg);
            return;
        };

        let mut fire_disconnected = false;
        {
            let mut inner = obj.lock();
            let prev = inner.state;
            let next = match prev.apply(CmEvent::DreqRecv) {
                Ok(next) => next,
                Err(t) => {
                    CmMetrics::incr(&self.metrics.stale_dropped);
                    log::warn!("[CM] {}", t);
                    return;
                }
            };
            inner.state = next;

            match prev {
                CmState::Connected => {
                    // Peer-initiated teardown: flush our side, reply, done.
                    if let Some(qp) = inner.data_qp.as_ref() {
                        if let Err(e) = qp.to_flush() {
                            log::warn!("[CM] flush on DREQ failed: {}", e);
                        }
                    }
                    self.send_drep_to(&inner, obj.local_port());
                    inner.state = match inner.state.apply(CmEvent::DrepSent) {
                        Ok(next) => next,
                        Err(t) => {
                            log::warn!("[CM] {}", t);
                            return;
                        }
                    };
                    fire_disconnected = true;
                }
                CmState::DreqPending => {
                    // Our DREQ crossed the peer's: acknowledge and finish.
                    self.send_drep_to(&inner, obj.local_port());
                    fire_disconnected = true;
                }
                CmState::Disconnected => {
                    // Already torn down: exactly one DREP per DREQ, no
                    // second upcall.
                    self.send_drep_to(&inner, obj.local_port());
                }
                _ => {}
            }
        }

        if fire_disconnected {
            log::debug!("[CM] disconnected (peer-initiated): port {}", obj.local_port());
            self.deliver(|sink| sink.on_disconnected(&Connection { obj: Arc::clone(&obj) }));
        }
    }

    /// Inbound DREP: our DREQ was acknowledged.
    fn handle_drep(&self, msg: &CmMessage) {
        let Some(obj) = self.table.match_attempt(msg.dport, msg.sport, msg.saddr.qpn) else {
            CmMetrics::incr(&self.metrics.stale_dropped);
            log::debug!("[CM] stale DREP for port {} dropped", msg.dport);
            return;
        };

        {
            let mut inner = obj.lock();
            let prev = inner.state;
            match prev.apply(CmEvent::DrepRecv) {
                Ok(next) => inner.state = next,
                Err(t) => {
                    CmMetrics::incr(&self.metrics.stale_dropped);
                    log::warn!("[CM] {}", t);
                    return;
                }
            }
            if prev != CmState::DreqPending {
                // Duplicate DREP after completion.
                return;
            }
        }

        log::debug!("[CM] disconnected (acknowledged): port {}", obj.local_port());
        self.deliver(|sink| sink.on_disconnected(&Connection { obj: Arc::clone(&obj) }));
    }

    /// Answer `inbound` with a protocol-level reject (no consumer data).
    fn send_protocol_reject(&self, inbound: &CmMessage) {
        let mut rej = CmMessage::new(CmOpcode::RejCm);
        rej.sport = inbound.dport;
        rej.dport = inbound.sport;
        rej.sqpn = inbound.dqpn;
        rej.dqpn = inbound.sqpn;
        rej.saddr = self.qp.local_addr();
        rej.daddr = inbound.saddr;

        match self.ahs.get_or_create(&inbound.saddr) {
            Ok(ah) => {
                let mut buf = [0u8; CM_MSG_LEN];
                let len = rej.encode(&mut buf);
                if let Err(e) = self.ring.send(ah, &buf[..len]) {
                    log::debug!("[CM] REJ_CM send failed: {}", e);
                } else {
                    CmMetrics::incr(&self.metrics.rejects_sent);
                }
            }
            Err(e) => log::debug!("[CM] no address handle for REJ_CM: {}", e),
        }
    }

    /// Send DREP for an object we still track. Caller holds the lock.
    fn send_drep_to(&self, inner: &CmInner, local_port: u16) {
        let mut drep = CmMessage::new(CmOpcode::Drep);
        drep.sport = local_port;
        drep.dport = inner.peer_port;
        drep.saddr = self.qp.local_addr();
        drep.daddr = inner.peer_addr;

        let ah = match inner.ah {
            Some(ah) => Ok(ah),
            None => self.ahs.get_or_create(&inner.peer_addr),
        };
        match ah {
            Ok(ah) => {
                let mut buf = [0u8; CM_MSG_LEN];
                let len = drep.encode(&mut buf);
                if let Err(e) = self.ring.send(ah, &buf[..len]) {
                    log::debug!("[CM] DREP send failed: {}", e);
                }
            }
            Err(e) => log::debug!("[CM] no address handle for DREP: {}", e),
        }
    }

    /// Answer a DREQ whose object is already reclaimed.
    fn send_drep_for(&self, inbound: &CmMessage) {
        let mut drep = CmMessage::new(CmOpcode::Drep);
        drep.sport = inbound.dport;
        drep.dport = inbound.sport;
        drep.saddr = self.qp.local_addr();
        drep.daddr = inbound.saddr;

        match self.ahs.get_or_create(&inbound.saddr) {
            Ok(ah) => {
                let mut buf = [0u8; CM_MSG_LEN];
                let len = drep.encode(&mut buf);
                if let Err(e) = self.ring.send(ah, &buf[..len]) {
                    log::debug!("[CM] DREP send failed: {}", e);
                }
            }
            Err(e) => log::debug!("[CM] no address handle for DREP: {}", e),
        }
    }

    /// Run one upcall with no CM lock held and count it.
    pub(crate) fn deliver<F: FnOnce(&dyn ConnectionEventSink)>(&self, f: F) {
        CmMetrics::incr(&self.metrics.upcalls_delivered);
        f(self.sink.as_ref());
    }
}
