// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! # UDCM - Unreliable-Datagram Connection Manager
//!
//! A pure Rust connection-management layer for RDMA transports: the component
//! that establishes, maintains, and tears down reliable connections between
//! two endpoints *before* any data transfer occurs, using a self-contained
//! REQ/REP/RTU handshake carried over an unreliable-datagram queue pair.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use udcm::{ClosureSink, CmConfig, CmTransport};
//! use udcm::transport::loopback::LoopbackFabric;
//!
//! fn main() -> udcm::Result<()> {
//!     let fabric = LoopbackFabric::new();
//!     let sink = Arc::new(ClosureSink::new(|event| {
//!         println!("cm event: {:?}", event);
//!     }));
//!
//!     // One transport context per device; the host supplies the CM UD queue pair.
//!     let qp = fabric.create_qp(0x11, 0x100);
//!     let cm = CmTransport::start(CmConfig::default(), qp, sink)?;
//!
//!     let listener = cm.listen(500)?;
//!     println!("listening on service {}", listener.service_id());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                         Session Layer (host)                       |
//! |     connect / listen / accept / reject / disconnect  +  upcalls    |
//! +--------------------------------------------------------------------+
//! |                            CM Layer                                |
//! |   CmTransport -> CmTable -> CmObject state machine -> upcall sink  |
//! |        Port Registry | Retry/Timer Engine | Dispatch Loop          |
//! +--------------------------------------------------------------------+
//! |                        Transport Ring                              |
//! |   fixed send/recv rings + AH cache over the CM UD queue pair       |
//! +--------------------------------------------------------------------+
//! |                     Host verbs capabilities                        |
//! |        DatagramQp (CM traffic)  |  DataPathQp (per connection)     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CmTransport`] | Per-device transport context, entry point for all CM operations |
//! | [`Connection`] | Handle for one connection attempt (active or accepted) |
//! | [`Listener`] | Handle for a passive service point |
//! | [`ConnRequest`] | Handle for an inbound connection request awaiting accept/reject |
//! | [`ConnectionEventSink`] | Upcall trait implemented by the session layer |
//! | [`CmConfig`] | Retry/timeout/ring tuning, fixed at context creation |
//!
//! ## Modules Overview
//!
//! - [`cm`] - Connection state machine, port registry, transport context
//! - [`protocol`] - Wire message codec (REQ/REP/RTU/DREQ/DREP)
//! - [`transport`] - Datagram rings, address-handle cache, verbs-facing traits
//! - [`engine`] - Dispatch loop, retry/timer engine, wake notifier
//!
//! The wire format is bit-exact between peers; both ends must agree on
//! [`protocol::CM_PROTO_VERSION`] and [`protocol::MAX_PRIVATE_DATA`] out of
//! band (negotiation is out of scope).

/// Connection state machine, CM objects, port registry, transport context.
pub mod cm;
/// Tuning constants and per-context configuration.
pub mod config;
/// Background dispatch loop, retry/timer engine, wake notifier.
pub mod engine;
/// Crate-wide error type.
pub mod error;
/// Upcall sink trait consumed by the session layer.
pub mod events;
/// CM wire message codec.
pub mod protocol;
/// Datagram rings, address-handle cache, verbs-facing capability traits.
pub mod transport;

pub use cm::{CmTransport, Connection, ConnRequest, Listener};
pub use config::CmConfig;
pub use error::{Error, Result};
pub use events::{ClosureSink, CmEventKind, ConnectionEventSink};
pub use transport::verbs::{AddressVector, DataPathQp, DatagramQp};

/// UDCM version string.
pub const VERSION: &str = "0.3.2";
