// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Upcalls into the session layer
//!
//! The CM layer reports every asynchronous outcome through
//! [`ConnectionEventSink`], implemented by the hosting session layer and
//! held by the transport context. Each upcall fires at most once per
//! logical event per object, from the dispatch thread, with no CM lock
//! held — implementations may call back into the CM layer (`accept`,
//! `reject`, `disconnect`) directly.

use std::sync::Arc;

use crate::cm::{ConnRequest, Connection, Listener};

/// Event sink the session layer implements to observe connection progress.
pub trait ConnectionEventSink: Send + Sync {
    /// Handshake finished; `private_data` is the peer's REP payload on the
    /// active side and the original REQ payload echo is *not* included —
    /// the passive side receives an empty slice here.
    fn on_connected(&self, conn: &Connection, private_data: &[u8]);

    /// A REQ arrived at a listener; `request` stays valid until the
    /// consumer accepts or rejects it.
    fn on_connection_request(&self, listener: &Listener, request: ConnRequest, private_data: &[u8]);

    /// Peer rejected the attempt: `Some` payload for a consumer reject,
    /// `None` for a protocol-level reject (stale/duplicate).
    fn on_rejected(&self, conn: &Connection, private_data: Option<&[u8]>);

    /// Establishment retries exhausted, or a fatal local failure.
    fn on_unreachable(&self, conn: &Connection);

    /// Teardown finished (peer-initiated, locally-initiated, or presumed
    /// after disconnect-phase exhaustion).
    fn on_disconnected(&self, conn: &Connection);
}

/// Owned form of one upcall, for closure-based sinks and test recording.
#[derive(Debug, Clone)]
pub enum CmEventKind {
    /// See [`ConnectionEventSink::on_connected`].
    Connected {
        /// The connection that completed.
        conn: Connection,
        /// Peer private data.
        private_data: Vec<u8>,
    },
    /// See [`ConnectionEventSink::on_connection_request`].
    ConnectionRequest {
        /// The listener that matched.
        listener: Listener,
        /// The request awaiting accept/reject.
        request: ConnRequest,
        /// REQ private data.
        private_data: Vec<u8>,
    },
    /// See [`ConnectionEventSink::on_rejected`].
    Rejected {
        /// The rejected attempt.
        conn: Connection,
        /// `Some` for consumer reject, `None` for protocol reject.
        private_data: Option<Vec<u8>>,
    },
    /// See [`ConnectionEventSink::on_unreachable`].
    Unreachable {
        /// The failed attempt.
        conn: Connection,
    },
    /// See [`ConnectionEventSink::on_disconnected`].
    Disconnected {
        /// The torn-down connection.
        conn: Connection,
    },
}

/// Closure-based sink adapter for tests, demos, and simple hosts.
///
/// # Example
/// ```
/// use udcm::{ClosureSink, CmEventKind};
///
/// let sink = ClosureSink::new(|event| {
///     if let CmEventKind::Connected { conn, .. } = event {
///         println!("connected: {:?}", conn);
///     }
/// });
/// # let _ = sink;
/// ```
pub struct ClosureSink<F>
where
    F: Fn(CmEventKind) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureSink<F>
where
    F: Fn(CmEventKind) + Send + Sync,
{
    /// Wrap a closure as an event sink.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ConnectionEventSink for ClosureSink<F>
where
    F: Fn(CmEventKind) + Send + Sync,
{
    fn on_connected(&self, conn: &Connection, private_data: &[u8]) {
        (self.callback)(CmEventKind::Connected {
            conn: conn.clone(),
            private_data: private_data.to_vec(),
        });
    }

    fn on_connection_request(&self, listener: &Listener, request: ConnRequest, private_data: &[u8]) {
        (self.callback)(CmEventKind::ConnectionRequest {
            listener: listener.clone(),
            request,
            private_data: private_data.to_vec(),
        });
    }

    fn on_rejected(&self, conn: &Connection, private_data: Option<&[u8]>) {
        (self.callback)(CmEventKind::Rejected {
            conn: conn.clone(),
            private_data: private_data.map(<[u8]>::to_vec),
        });
    }

    fn on_unreachable(&self, conn: &Connection) {
        (self.callback)(CmEventKind::Unreachable { conn: conn.clone() });
    }

    fn on_disconnected(&self, conn: &Connection) {
        (self.callback)(CmEventKind::Disconnected { conn: conn.clone() });
    }
}

/// Convenience: a shared no-op sink for contexts that only poll state.
#[must_use]
pub fn null_sink() -> Arc<dyn ConnectionEventSink> {
    Arc::new(ClosureSink::new(|_| {}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::CmObject;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_sink_forwards_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sink = ClosureSink::new(move |event| {
            if let CmEventKind::Unreachable { .. } = event {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let conn = Connection { obj: CmObject::new(9, true) };
        sink.on_unreachable(&conn);
        sink.on_unreachable(&conn);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
