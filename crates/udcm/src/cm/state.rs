// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Connection state machine
//!
//! One tagged state enum and one central transition function. Every
//! message-, timer-, and consumer-driven transition goes through
//! [`CmState::apply`]; invalid (state, event) pairs are rejected in one
//! place instead of re-deriving validity at each call site.
//!
//! ```text
//!                connect                 REP              RTU sent
//!   ┌──────┐ ──────────────▶ ┌────────────┐ ─────────▶ ┌───────────┐
//!   │ Idle │                 │ RepPending │            │ Connected │
//!   └──────┘ ──┐             └────────────┘            └───────────┘
//!      listen  │                │  REJ / retries out      │  ▲ RTU
//!              ▼                ▼                  DREQ   │  │
//!   ┌────────┐   REQ   ┌───────────────┐ accept ┌────────┴──┴───┐
//!   │ Listen │ ───────▶ │ AcceptPending │ ─────▶ │  RtuPending  │
//!   └────────┘ (spawn)  └───────────────┘        └──────────────┘
//!                          │ reject
//!                          ▼
//!   terminal: Rejected | Unreachable | Disconnected ──▶ Destroy
//!
//!   Connected ─ disconnect ─▶ DreqPending ─ DREP/exhaustion ─▶ Disconnected
//!   Connected ─ DREQ recv ──▶ DreqReceived ─ DREP sent ──────▶ Disconnected
//! ```
//!
//! Disconnect-phase retry exhaustion lands in `Disconnected`, not a
//! failure state: an unresponsive peer is presumed gone and must not block
//! local reclamation. Establishment-phase exhaustion lands in
//! `Unreachable`. The asymmetry is deliberate.

/// Lifecycle state of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmState {
    /// Created, not yet activated.
    Idle,
    /// Passive service point; reused across inbound requests.
    Listen,
    /// REQ sent, awaiting REP.
    RepPending,
    /// Inbound REQ surfaced, awaiting consumer accept/reject.
    AcceptPending,
    /// REP sent, awaiting RTU.
    RtuPending,
    /// Handshake complete.
    Connected,
    /// DREQ sent, awaiting DREP.
    DreqPending,
    /// DREQ received; teardown reply in progress.
    DreqReceived,
    /// Teardown complete (either side, or presumed after exhaustion).
    Disconnected,
    /// Peer rejected the attempt.
    Rejected,
    /// Establishment retries exhausted or local fatal failure.
    Unreachable,
    /// Marked for reclamation; only the dispatch thread removes it.
    Destroy,
}

/// Everything that can drive a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmEvent {
    /// Consumer called `connect`.
    Connect,
    /// Consumer called `listen`.
    Listen,
    /// Consumer called `accept`.
    Accept,
    /// Consumer called `reject`.
    Reject,
    /// Consumer called `disconnect`.
    Disconnect,
    /// Object released for reclamation.
    Free,
    /// Inbound REQ matched (spawns the passive object).
    ReqRecv,
    /// Inbound REP.
    RepRecv,
    /// Inbound REJ_USER / REJ_CM.
    RejRecv,
    /// Inbound RTU.
    RtuRecv,
    /// Inbound DREQ.
    DreqRecv,
    /// Inbound DREP.
    DrepRecv,
    /// Teardown reply went out after an inbound DREQ.
    DrepSent,
    /// Retry engine exhausted the phase's resend budget.
    RetriesExhausted,
    /// Fatal local failure (data-path programming, resend resources).
    LocalFailure,
}

/// An (state, event) pair the protocol does not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the object was in.
    pub from: CmState,
    /// Event that arrived.
    pub event: CmEvent,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event {:?} invalid in state {:?}", self.event, self.from)
    }
}

impl CmState {
    /// Compute the successor state for `event`, or reject the pair.
    ///
    /// Self-transitions are meaningful: `Connected + RepRecv` stays
    /// `Connected` (the handler resends RTU), `Disconnected + DreqRecv`
    /// stays `Disconnected` (the handler resends DREP). Neither re-fires
    /// an upcall.
    pub fn apply(self, event: CmEvent) -> Result<CmState, InvalidTransition> {
        use CmEvent as E;
        use CmState as S;

        let next = match (self, event) {
            // Activation
            (S::Idle, E::Connect) => S::RepPending,
            (S::Idle, E::Listen) => S::Listen,
            (S::Idle, E::ReqRecv) => S::AcceptPending,

            // Active establishment
            (S::RepPending, E::RepRecv) => S::Connected,
            (S::RepPending, E::RejRecv) => S::Rejected,
            (S::RepPending, E::RetriesExhausted) => S::Unreachable,
            (S::RepPending, E::LocalFailure) => S::Unreachable,
            // Lost RTU: peer resends REP, we resend RTU.
            (S::Connected, E::RepRecv) => S::Connected,

            // Passive establishment
            (S::AcceptPending, E::Accept) => S::RtuPending,
            (S::AcceptPending, E::Reject) => S::Rejected,
            (S::RtuPending, E::RtuRecv) => S::Connected,
            (S::RtuPending, E::RejRecv) => S::Rejected,
            (S::RtuPending, E::RetriesExhausted) => S::Unreachable,
            (S::RtuPending, E::LocalFailure) => S::Unreachable,

            // Teardown
            (S::Connected, E::Disconnect) => S::DreqPending,
            (S::Connected, E::DreqRecv) => S::DreqReceived,
            (S::DreqReceived, E::DrepSent) => S::Disconnected,
            (S::DreqPending, E::DrepRecv) => S::Disconnected,
            // Crossing DREQs: the peer's DREQ acknowledges ours.
            (S::DreqPending, E::DreqRecv) => S::Disconnected,
            // Presume the peer gone; teardown completes locally.
            (S::DreqPending, E::RetriesExhausted) => S::Disconnected,
            (S::DreqPending, E::LocalFailure) => S::Disconnected,
            // Retransmitted DREQ after teardown: resend DREP only.
            (S::Disconnected, E::DreqRecv) => S::Disconnected,
            // Duplicate DREP after teardown completed: plain noise.
            (S::Disconnected, E::DrepRecv) => S::Disconnected,

            // Reclamation from anywhere.
            (_, E::Free) => S::Destroy,

            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    /// Whether this state awaits a reply and is subject to the retry engine.
    #[must_use]
    pub fn expects_reply(self) -> bool {
        matches!(self, CmState::RepPending | CmState::RtuPending | CmState::DreqPending)
    }

    /// Whether the attempt has reached an end state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CmState::Disconnected | CmState::Rejected | CmState::Unreachable | CmState::Destroy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CmEvent as E;
    use CmState as S;

    #[test]
    fn test_active_happy_path() {
        let s = S::Idle.apply(E::Connect).expect("connect");
        assert_eq!(s, S::RepPending);
        let s = s.apply(E::RepRecv).expect("rep");
        assert_eq!(s, S::Connected);
    }

    #[test]
    fn test_passive_happy_path() {
        let s = S::Idle.apply(E::ReqRecv).expect("spawn");
        assert_eq!(s, S::AcceptPending);
        let s = s.apply(E::Accept).expect("accept");
        assert_eq!(s, S::RtuPending);
        let s = s.apply(E::RtuRecv).expect("rtu");
        assert_eq!(s, S::Connected);
    }

    #[test]
    fn test_teardown_initiator() {
        let s = S::Connected.apply(E::Disconnect).expect("dreq");
        assert_eq!(s, S::DreqPending);
        assert_eq!(s.apply(E::DrepRecv).expect("drep"), S::Disconnected);
    }

    #[test]
    fn test_teardown_receiver() {
        let s = S::Connected.apply(E::DreqRecv).expect("dreq in");
        assert_eq!(s, S::DreqReceived);
        assert_eq!(s.apply(E::DrepSent).expect("drep out"), S::Disconnected);
    }

    #[test]
    fn test_crossing_dreqs_complete_teardown() {
        let s = S::DreqPending.apply(E::DreqRecv).expect("crossing");
        assert_eq!(s, S::Disconnected);
    }

    #[test]
    fn test_disconnect_exhaustion_is_success() {
        assert_eq!(
            S::DreqPending.apply(E::RetriesExhausted).expect("presumed gone"),
            S::Disconnected
        );
    }

    #[test]
    fn test_establishment_exhaustion_is_failure() {
        assert_eq!(
            S::RepPending.apply(E::RetriesExhausted).expect("gave up"),
            S::Unreachable
        );
        assert_eq!(
            S::RtuPending.apply(E::RetriesExhausted).expect("gave up"),
            S::Unreachable
        );
    }

    #[test]
    fn test_local_failure_routing() {
        assert_eq!(S::RepPending.apply(E::LocalFailure).expect("qp"), S::Unreachable);
        assert_eq!(S::RtuPending.apply(E::LocalFailure).expect("qp"), S::Unreachable);
        // Teardown still completes locally even on a resend failure.
        assert_eq!(S::DreqPending.apply(E::LocalFailure).expect("qp"), S::Disconnected);
        assert!(S::Connected.apply(E::LocalFailure).is_err());
    }

    #[test]
    fn test_stale_rep_while_connected_is_self_transition() {
        assert_eq!(S::Connected.apply(E::RepRecv).expect("resend rtu"), S::Connected);
    }

    #[test]
    fn test_retransmitted_dreq_after_teardown() {
        assert_eq!(
            S::Disconnected.apply(E::DreqRecv).expect("resend drep"),
            S::Disconnected
        );
    }

    #[test]
    fn test_free_from_anywhere() {
        for s in [
            S::Idle,
            S::Listen,
            S::RepPending,
            S::AcceptPending,
            S::RtuPending,
            S::Connected,
            S::DreqPending,
            S::Disconnected,
            S::Rejected,
            S::Unreachable,
        ] {
            assert_eq!(s.apply(E::Free).expect("free"), S::Destroy);
        }
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        // A REP at a listener makes no sense.
        assert!(S::Listen.apply(E::RepRecv).is_err());
        // RTU before REP went out.
        assert!(S::AcceptPending.apply(E::RtuRecv).is_err());
        // Disconnecting an attempt that never connected.
        assert!(S::RepPending.apply(E::Disconnect).is_err());
        // Accepting twice.
        assert!(S::RtuPending.apply(E::Accept).is_err());
        // Message after reclamation mark.
        assert!(S::Destroy.apply(E::RepRecv).is_err());
    }

    #[test]
    fn test_reply_expectation_classification() {
        assert!(S::RepPending.expects_reply());
        assert!(S::RtuPending.expects_reply());
        assert!(S::DreqPending.expects_reply());
        assert!(!S::Connected.expects_reply());
        assert!(!S::Listen.expects_reply());
    }
}
