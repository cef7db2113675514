// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Datagram retransmission must never create two connections.

mod common;

use std::time::Duration;

use common::{fast_config, start_cm, WAIT};
use udcm::transport::loopback::{LoopbackDataQp, LoopbackFabric};
use udcm::CmEventKind;

#[test]
fn duplicated_req_surfaces_one_request() {
    let fabric = LoopbackFabric::new();
    let (cm_a, _sink_a, qp_a) = start_cm(&fabric, 1, 0x10, fast_config());
    let (cm_b, sink_b, _qp_b) = start_cm(&fabric, 2, 0x20, fast_config());

    cm_b.listen(500).expect("listen");

    // The wire delivers the REQ twice, back to back.
    qp_a.inject_duplicate(1);
    cm_a.connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x100), b"dup")
        .expect("connect");

    sink_b.wait_for_request(WAIT).expect("request upcall");
    // Give the duplicate time to arrive and be (not) surfaced.
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(
        sink_b.count(|e| matches!(e, CmEventKind::ConnectionRequest { .. })),
        1,
        "exactly one AcceptPending object per REQ identity"
    );
    // At least the injected duplicate was suppressed; the unanswered
    // attempt's own REQ retries may add more.
    assert!(cm_b.metrics().duplicates_suppressed >= 1);
}

#[test]
fn req_retransmission_during_accept_is_suppressed() {
    let fabric = LoopbackFabric::new();
    let (cm_a, sink_a, _qp_a) = start_cm(&fabric, 1, 0x10, fast_config());
    let (cm_b, sink_b, qp_b) = start_cm(&fabric, 2, 0x20, fast_config());

    cm_b.listen(500).expect("listen");

    let conn_a = cm_a
        .connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x100), b"again")
        .expect("connect");

    let (_, request, _) = sink_b.wait_for_request(WAIT).expect("request");

    // Lose the first REP: the active side keeps re-REQing while the
    // passive side already sits in RtuPending; those REQs must be
    // suppressed as duplicates, and the REP retry completes the shake.
    qp_b.inject_drop(1);
    cm_b.accept(&request, LoopbackDataQp::new(0x200), b"ok").expect("accept");

    let (got, _) = sink_a.wait_for_connected(WAIT).expect("connected");
    assert!(got.same_as(&conn_a));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(sink_b.count(|e| matches!(e, CmEventKind::ConnectionRequest { .. })), 1);
    assert_eq!(sink_a.count(|e| matches!(e, CmEventKind::Connected { .. })), 1);
    assert!(cm_b.metrics().duplicates_suppressed >= 1, "retried REQ was suppressed");
}

#[test]
fn duplicated_rep_triggers_rtu_resend_not_second_upcall() {
    let fabric = LoopbackFabric::new();
    let (cm_a, sink_a, _qp_a) = start_cm(&fabric, 1, 0x10, fast_config());
    let (cm_b, sink_b, qp_b) = start_cm(&fabric, 2, 0x20, fast_config());

    cm_b.listen(500).expect("listen");
    cm_a.connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x100), b"x")
        .expect("connect");

    let (_, request, _) = sink_b.wait_for_request(WAIT).expect("request");

    // The REP goes out twice; the second copy lands after the active
    // side is already Connected and must only provoke an RTU resend.
    qp_b.inject_duplicate(1);
    cm_b.accept(&request, LoopbackDataQp::new(0x200), b"y").expect("accept");

    sink_a.wait_for_connected(WAIT).expect("active connected");
    sink_b.wait_for_connected(WAIT).expect("passive connected");
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(sink_a.count(|e| matches!(e, CmEventKind::Connected { .. })), 1);
    assert_eq!(sink_b.count(|e| matches!(e, CmEventKind::Connected { .. })), 1);
}
