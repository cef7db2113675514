// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Errors returned by UDCM operations.
//!
//! Synchronous failures (port exhaustion, ring full, bad arguments) are
//! returned directly from `connect`/`listen`/`accept`/`reject`/`disconnect`.
//! Asynchronous outcomes (reject by peer, retry exhaustion, disconnect) are
//! delivered through the [`ConnectionEventSink`](crate::ConnectionEventSink)
//! upcalls, never as `Error` values.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by UDCM connection-management operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Port Registry
    // ========================================================================
    /// Requested CM port is already allocated (e.g. second listener on a service id).
    PortBusy(u16),
    /// The 16-bit CM port space has no free entries left.
    PortSpaceExhausted,

    // ========================================================================
    // Transport Ring / Address Handles
    // ========================================================================
    /// All send slots are in flight and no completion retired within the bounded wait.
    RingFull,
    /// The host verbs layer failed to create an address handle for the peer.
    AhCreateFailed(String),
    /// Posting a datagram to the CM queue pair failed.
    PostFailed(String),

    // ========================================================================
    // Data Path
    // ========================================================================
    /// Programming the data-path queue pair (ready / send-ready / flush) failed.
    ///
    /// Always fatal to the attempt; never silently retried.
    QpProgramFailed(String),

    // ========================================================================
    // Consumer Input
    // ========================================================================
    /// Consumer-supplied private data exceeds [`MAX_PRIVATE_DATA`](crate::protocol::MAX_PRIVATE_DATA).
    PrivateDataTooLarge(usize),
    /// Operation is not valid for the object's current state
    /// (e.g. `accept` on an already-accepted request).
    InvalidState(&'static str),
    /// The transport context has been shut down.
    ShuttingDown,

    // ========================================================================
    // Host / OS
    // ========================================================================
    /// Underlying OS failure (dispatch thread spawn).
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Port registry
            Error::PortBusy(port) => write!(f, "CM port {} is already in use", port),
            Error::PortSpaceExhausted => write!(f, "CM port space exhausted (all 65535 ports allocated)"),
            // Ring / AH
            Error::RingFull => write!(f, "CM send ring full: no completion retired within bounded wait"),
            Error::AhCreateFailed(msg) => write!(f, "address handle creation failed: {}", msg),
            Error::PostFailed(msg) => write!(f, "datagram post failed: {}", msg),
            // Data path
            Error::QpProgramFailed(msg) => write!(f, "data-path QP programming failed: {}", msg),
            // Consumer input
            Error::PrivateDataTooLarge(len) => write!(
                f,
                "private data too large: {} bytes (max {})",
                len,
                crate::protocol::MAX_PRIVATE_DATA
            ),
            Error::InvalidState(what) => write!(f, "invalid state for operation: {}", what),
            Error::ShuttingDown => write!(f, "CM transport context is shutting down"),
            // Host / OS
            Error::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {}
