// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Private data: byte-exact round-trips, size limits, and isolation
//! between concurrent attempts on one listener.

mod common;

use common::{fast_config, start_cm, WAIT};
use udcm::protocol::MAX_PRIVATE_DATA;
use udcm::transport::loopback::{LoopbackDataQp, LoopbackFabric};
use udcm::{CmEventKind, Error};

#[test]
fn payload_round_trips_at_every_size() {
    let fabric = LoopbackFabric::new();
    let (cm_a, sink_a, _qp_a) = start_cm(&fabric, 1, 0x10, fast_config());
    let (cm_b, sink_b, _qp_b) = start_cm(&fabric, 2, 0x20, fast_config());

    cm_b.listen(500).expect("listen");

    // Tag every payload with the attempt index so events from earlier
    // iterations can never satisfy a later match.
    for (i, len) in [1usize, 2, 7, 32, MAX_PRIVATE_DATA].into_iter().enumerate() {
        let req_payload: Vec<u8> = (0..len).map(|b| (b as u8).wrapping_mul(3).wrapping_add(i as u8)).collect();
        let rep_payload: Vec<u8> = req_payload.iter().rev().map(|b| b.wrapping_add(100)).collect();

        cm_a.connect(
            cm_b.local_addr(),
            500,
            LoopbackDataQp::new(0x100 + i as u32),
            &req_payload,
        )
        .expect("connect");

        let req_event = sink_b
            .wait_for(
                |e| matches!(e, CmEventKind::ConnectionRequest { private_data, .. } if *private_data == req_payload),
                WAIT,
            )
            .unwrap_or_else(|| panic!("REQ payload byte-for-byte at len {}", len));
        let CmEventKind::ConnectionRequest { request, .. } = req_event else { unreachable!() };

        cm_b.accept(&request, LoopbackDataQp::new(0x200 + i as u32), &rep_payload)
            .expect("accept");
        sink_a
            .wait_for(
                |e| matches!(e, CmEventKind::Connected { private_data, .. } if *private_data == rep_payload),
                WAIT,
            )
            .unwrap_or_else(|| panic!("REP payload byte-for-byte at len {}", len));
    }

    // An empty payload round-trips too.
    cm_a.connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x900), &[])
        .expect("connect");
    let req_event = sink_b
        .wait_for(
            |e| matches!(e, CmEventKind::ConnectionRequest { private_data, .. } if private_data.is_empty()),
            WAIT,
        )
        .expect("empty REQ payload");
    let CmEventKind::ConnectionRequest { request, .. } = req_event else { unreachable!() };
    cm_b.accept(&request, LoopbackDataQp::new(0x901), &[]).expect("accept");
    sink_a
        .wait_for(
            |e| matches!(e, CmEventKind::Connected { private_data, .. } if private_data.is_empty()),
            WAIT,
        )
        .expect("empty REP payload");
}

#[test]
fn oversized_payload_is_refused_synchronously() {
    let fabric = LoopbackFabric::new();
    let (cm_a, _sink_a, _qp_a) = start_cm(&fabric, 1, 0x10, fast_config());

    let oversized = vec![0u8; MAX_PRIVATE_DATA + 1];
    let result = cm_a.connect(
        cm_a.local_addr(),
        500,
        LoopbackDataQp::new(0x100),
        &oversized,
    );
    assert!(matches!(result, Err(Error::PrivateDataTooLarge(_))));
}

#[test]
fn accept_and_reject_never_cross_deliver_payloads() {
    let fabric = LoopbackFabric::new();
    let (cm_a, sink_a, _qp_a) = start_cm(&fabric, 1, 0x10, fast_config());
    let (cm_c, sink_c, _qp_c) = start_cm(&fabric, 3, 0x30, fast_config());
    let (cm_b, sink_b, _qp_b) = start_cm(&fabric, 2, 0x20, fast_config());

    cm_b.listen(500).expect("listen");

    // Two requesters hit the same listener.
    let conn_a = cm_a
        .connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x100), b"from-a")
        .expect("connect a");
    let conn_c = cm_c
        .connect(cm_b.local_addr(), 500, LoopbackDataQp::new(0x300), b"from-c")
        .expect("connect c");

    // Wait until both requests surfaced, then tell them apart by payload.
    let req_a = sink_b
        .wait_for(
            |e| matches!(e, CmEventKind::ConnectionRequest { private_data, .. } if private_data == b"from-a"),
            WAIT,
        )
        .expect("request from a");
    let req_c = sink_b
        .wait_for(
            |e| matches!(e, CmEventKind::ConnectionRequest { private_data, .. } if private_data == b"from-c"),
            WAIT,
        )
        .expect("request from c");

    let CmEventKind::ConnectionRequest { request: request_a, .. } = req_a else { unreachable!() };
    let CmEventKind::ConnectionRequest { request: request_c, .. } = req_c else { unreachable!() };

    // Accept one, reject the other, back to back.
    cm_b.accept(&request_a, LoopbackDataQp::new(0x200), b"welcome-a").expect("accept");
    cm_b.reject(&request_c, b"denied-c").expect("reject");

    let (got_a, rep_a) = sink_a.wait_for_connected(WAIT).expect("a connected");
    assert!(got_a.same_as(&conn_a));
    assert_eq!(rep_a, b"welcome-a");

    let rejected = sink_c
        .wait_for(|e| matches!(e, CmEventKind::Rejected { .. }), WAIT)
        .expect("c rejected");
    let CmEventKind::Rejected { conn: got_c, private_data } = rejected else { unreachable!() };
    assert!(got_c.same_as(&conn_c));
    assert_eq!(private_data.as_deref(), Some(&b"denied-c"[..]));

    // No cross-delivery in either direction.
    assert_eq!(sink_a.count(|e| matches!(e, CmEventKind::Rejected { .. })), 0);
    assert_eq!(sink_c.count(|e| matches!(e, CmEventKind::Connected { .. })), 0);
}
