// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Shared scaffolding for the CM scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use udcm::transport::loopback::{LoopbackFabric, LoopbackQp};
use udcm::{CmConfig, CmEventKind, CmTransport, ConnRequest, ConnectionEventSink, Connection, Listener};

/// Sink that records every upcall for later inspection.
pub struct RecordingSink {
    events: Mutex<Vec<CmEventKind>>,
}

impl RecordingSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    /// All events seen so far.
    pub fn events(&self) -> Vec<CmEventKind> {
        self.events.lock().expect("sink lock").clone()
    }

    /// Number of events matching `pred`.
    pub fn count<F: Fn(&CmEventKind) -> bool>(&self, pred: F) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    /// Poll until an event matching `pred` shows up, or `timeout` passes.
    pub fn wait_for<F: Fn(&CmEventKind) -> bool>(
        &self,
        pred: F,
        timeout: Duration,
    ) -> Option<CmEventKind> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(hit) = self.events().into_iter().find(|e| pred(e)) {
                return Some(hit);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Wait for a connection-request upcall and hand back the request.
    pub fn wait_for_request(&self, timeout: Duration) -> Option<(Listener, ConnRequest, Vec<u8>)> {
        self.wait_for(|e| matches!(e, CmEventKind::ConnectionRequest { .. }), timeout)
            .map(|e| match e {
                CmEventKind::ConnectionRequest { listener, request, private_data } => {
                    (listener, request, private_data)
                }
                _ => unreachable!(),
            })
    }

    /// Wait for a connected upcall and hand back the connection + payload.
    pub fn wait_for_connected(&self, timeout: Duration) -> Option<(Connection, Vec<u8>)> {
        self.wait_for(|e| matches!(e, CmEventKind::Connected { .. }), timeout)
            .map(|e| match e {
                CmEventKind::Connected { conn, private_data } => (conn, private_data),
                _ => unreachable!(),
            })
    }
}

impl ConnectionEventSink for RecordingSink {
    fn on_connected(&self, conn: &Connection, private_data: &[u8]) {
        self.events.lock().expect("sink lock").push(CmEventKind::Connected {
            conn: conn.clone(),
            private_data: private_data.to_vec(),
        });
    }

    fn on_connection_request(&self, listener: &Listener, request: ConnRequest, private_data: &[u8]) {
        self.events.lock().expect("sink lock").push(CmEventKind::ConnectionRequest {
            listener: listener.clone(),
            request,
            private_data: private_data.to_vec(),
        });
    }

    fn on_rejected(&self, conn: &Connection, private_data: Option<&[u8]>) {
        self.events.lock().expect("sink lock").push(CmEventKind::Rejected {
            conn: conn.clone(),
            private_data: private_data.map(<[u8]>::to_vec),
        });
    }

    fn on_unreachable(&self, conn: &Connection) {
        self.events
            .lock()
            .expect("sink lock")
            .push(CmEventKind::Unreachable { conn: conn.clone() });
    }

    fn on_disconnected(&self, conn: &Connection) {
        self.events
            .lock()
            .expect("sink lock")
            .push(CmEventKind::Disconnected { conn: conn.clone() });
    }
}

/// Tight timeouts so retry/exhaustion scenarios finish quickly.
pub fn fast_config() -> CmConfig {
    CmConfig {
        max_retries: 3,
        reply_timeout: Duration::from_millis(30),
        rtu_timeout: Duration::from_millis(30),
        disconnect_timeout: Duration::from_millis(20),
        idle_scan_interval: Duration::from_millis(5),
        ..CmConfig::default()
    }
}

/// Bring up one CM transport context on the fabric.
pub fn start_cm(
    fabric: &LoopbackFabric,
    lid: u16,
    qpn: u32,
    config: CmConfig,
) -> (Arc<CmTransport>, Arc<RecordingSink>, Arc<LoopbackQp>) {
    let qp = fabric.create_qp(lid, qpn);
    let sink = RecordingSink::shared();
    let cm = CmTransport::start(config, qp.clone(), sink.clone()).expect("cm start");
    (cm, sink, qp)
}

/// Generous wall-clock bound for background-thread progress.
pub const WAIT: Duration = Duration::from_secs(2);
