// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Verbs-facing capability traits
//!
//! The CM layer neither opens devices nor owns queue pairs; the host hands
//! it two narrow capabilities:
//!
//! - [`DatagramQp`]: the dedicated unreliable-datagram queue pair the CM
//!   protocol rides (address handles, post/poll send and receive, async
//!   device events).
//! - [`DataPathQp`]: the queue pair that will carry application traffic
//!   once the handshake completes. The CM layer programs it (two-phase
//!   ready transition, flush on teardown) but never posts to it.
//!
//! Both traits are object-safe and `Send + Sync`: consumer threads and the
//! dispatch thread call into them concurrently.

use std::sync::Arc;

use crate::engine::wake::WakeNotifier;
use crate::Result;

/// A peer's link address: everything needed to steer a datagram at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddressVector {
    /// Link-layer id (LID) of the peer's port.
    pub lid: u16,
    /// QPN of the peer's CM unreliable-datagram queue pair.
    pub qpn: u32,
    /// 128-bit global id (GID) of the peer's port.
    pub gid: [u8; 16],
}

impl std::fmt::Display for AddressVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lid=0x{:04x} qpn=0x{:06x}", self.lid, self.qpn)
    }
}

/// Opaque handle to a host-owned address handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AhId(pub u64);

/// One received CM datagram: the receive work id that carried it plus the
/// payload bytes (copied out of the registered buffer by the host).
#[derive(Debug)]
pub struct RecvMsg {
    /// Work id of the receive credit that completed (returned to the ring).
    pub wr_id: u64,
    /// Datagram payload.
    pub data: Vec<u8>,
}

/// Asynchronous device event observed on the CM queue pair's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncEvent {
    /// Port state changed to active.
    PortActive,
    /// Port went down; in-flight handshakes will time out.
    PortDown,
    /// Unrecoverable device error.
    DeviceFatal,
}

impl AsyncEvent {
    /// Whether the event makes further CM traffic on this device pointless.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, AsyncEvent::DeviceFatal)
    }
}

/// The CM unreliable-datagram queue pair, as provided by the host.
///
/// Completion notification is level-triggered through the wake notifier the
/// host is given at context creation (see
/// [`CmTransport::start`](crate::CmTransport::start)); the poll methods
/// below never block.
pub trait DatagramQp: Send + Sync {
    /// Link address of this CM queue pair (what peers put in `saddr`).
    fn local_addr(&self) -> AddressVector;

    /// Register the dispatch loop's wake notifier.
    ///
    /// The host must `notify()` it whenever a send or receive completion
    /// retires and whenever an async device event arrives; notification
    /// must never block and may coalesce.
    fn set_notifier(&self, notifier: Arc<WakeNotifier>);

    /// Create an address handle for `peer`. At most one is requested per
    /// peer; the CM layer caches and reuses it.
    fn create_ah(&self, peer: &AddressVector) -> Result<AhId>;

    /// Destroy a previously created address handle.
    fn destroy_ah(&self, ah: AhId);

    /// Post one datagram send addressed via `ah`. The completion surfaces
    /// through [`poll_send`](Self::poll_send) carrying `wr_id`.
    fn post_send(&self, ah: AhId, wr_id: u64, payload: &[u8]) -> Result<()>;

    /// Make one receive credit with id `wr_id` available to the hardware.
    fn post_recv(&self, wr_id: u64) -> Result<()>;

    /// Harvest retired send work ids into `out`; returns how many.
    fn poll_send(&self, out: &mut Vec<u64>) -> usize;

    /// Harvest one received datagram, or `None` when nothing completed.
    fn poll_recv(&self) -> Option<RecvMsg>;

    /// Drain one pending asynchronous device event, if any.
    fn poll_async_event(&self) -> Option<AsyncEvent> {
        None
    }
}

/// The data-path queue pair of one connection attempt.
///
/// Supplied by the consumer on `connect`/`accept`; the CM layer drives its
/// state transitions at the handshake points the protocol requires.
pub trait DataPathQp: Send + Sync {
    /// QPN carried in REQ/REP so the peer can address this queue pair.
    fn qpn(&self) -> u32;

    /// First phase: program the queue pair to receive from the peer.
    fn to_ready(&self, peer: &AddressVector, peer_qpn: u32) -> Result<()>;

    /// Second phase: make the queue pair send-capable.
    fn to_send_ready(&self) -> Result<()>;

    /// Transition to the error state, flushing outstanding work. Used on
    /// both sides of a disconnect before any DREQ/DREP goes out.
    fn to_flush(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_vector_display() {
        let addr = AddressVector { lid: 0x1A, qpn: 0x2B, gid: [0; 16] };
        assert_eq!(addr.to_string(), "lid=0x001a qpn=0x00002b");
    }

    #[test]
    fn test_async_event_fatality() {
        assert!(AsyncEvent::DeviceFatal.is_fatal());
        assert!(!AsyncEvent::PortDown.is_fatal());
        assert!(!AsyncEvent::PortActive.is_fatal());
    }
}
