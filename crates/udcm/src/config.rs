// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! UDCM Global Configuration - Single Source of Truth
//!
//! This module centralizes every CM tuning constant and the per-context
//! runtime configuration. **Never hardcode these elsewhere!**
//!
//! Two levels:
//!
//! - **Static**: compile-time defaults below (retry ceiling, phase timeouts,
//!   ring depths). These are tuning values ratified against interoperability
//!   needs, not protocol invariants; both peers only have to agree on the
//!   wire constants in [`crate::protocol`].
//! - **Dynamic**: [`CmConfig`], fixed at transport-context creation. The
//!   hosting environment overrides fields before calling
//!   [`CmTransport::start`](crate::CmTransport::start).

use std::time::Duration;

// =======================================================================
// Retry / Timeout Defaults
//
// Each phase that expects a reply (REQ->REP, REP->RTU, DREQ->DREP) retries
// with exponential backoff: `timeout << retries`. The disconnect phase is
// deliberately the shortest: an unresponsive peer must not block local
// resource reclamation.
// =======================================================================

/// Default maximum resends per phase before the attempt is declared failed.
///
/// Establishment phases (REQ, REP) surface exhaustion as unreachable;
/// the disconnect phase finalizes as if the peer acknowledged.
pub const DEFAULT_MAX_RETRIES: u32 = 7;

/// Default base timeout for the reply phase (REQ sent, awaiting REP).
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(800);

/// Default base timeout for the ready-to-use phase (REP sent, awaiting RTU).
pub const DEFAULT_RTU_TIMEOUT: Duration = Duration::from_millis(400);

/// Default base timeout for the disconnect phase (DREQ sent, awaiting DREP).
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_millis(200);

/// Dispatch-loop park interval when live objects exist but none has a
/// pending retry deadline.
pub const DEFAULT_IDLE_SCAN_INTERVAL: Duration = Duration::from_millis(50);

// =======================================================================
// Ring Sizing
// =======================================================================

/// Default depth of the CM send and receive rings (slots each).
///
/// CM traffic is sparse control-plane traffic; 64 in-flight datagrams is
/// generous for thousands of concurrent attempts.
pub const DEFAULT_RING_DEPTH: usize = 64;

/// Default completion-queue size requested from the host for the CM QP.
pub const DEFAULT_CQ_SIZE: usize = 128;

/// Bounded number of yield-and-repoll rounds `send()` performs when the
/// send ring is momentarily full before failing with `Error::RingFull`.
pub const SEND_FULL_YIELD_ROUNDS: usize = 1000;

/// Per-context CM tuning, fixed at transport-context creation.
///
/// # Example
/// ```
/// use udcm::CmConfig;
/// use std::time::Duration;
///
/// let config = CmConfig {
///     max_retries: 3,
///     reply_timeout: Duration::from_millis(50),
///     ..CmConfig::default()
/// };
/// assert_eq!(config.ring_depth, udcm::config::DEFAULT_RING_DEPTH);
/// ```
#[derive(Debug, Clone)]
pub struct CmConfig {
    /// Resend ceiling per phase. See [`DEFAULT_MAX_RETRIES`].
    pub max_retries: u32,
    /// Base REQ->REP timeout, scaled by `1 << retries`.
    pub reply_timeout: Duration,
    /// Base REP->RTU timeout, scaled by `1 << retries`.
    pub rtu_timeout: Duration,
    /// Base DREQ->DREP timeout, scaled by `1 << retries`.
    pub disconnect_timeout: Duration,
    /// Send/receive ring depth (slots each).
    pub ring_depth: usize,
    /// Completion-queue size requested from the host.
    pub cq_size: usize,
    /// Dispatch-loop park interval with no pending deadline.
    pub idle_scan_interval: Duration,
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            rtu_timeout: DEFAULT_RTU_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            ring_depth: DEFAULT_RING_DEPTH,
            cq_size: DEFAULT_CQ_SIZE,
            idle_scan_interval: DEFAULT_IDLE_SCAN_INTERVAL,
        }
    }
}

impl CmConfig {
    /// Backoff-scaled timeout for a phase: `base << retries`, saturating.
    ///
    /// Monotonically non-decreasing in `retries`; the retry engine relies
    /// on that to keep the resend schedule well ordered.
    #[must_use]
    pub fn scaled(base: Duration, retries: u32) -> Duration {
        base.saturating_mul(1u32.checked_shl(retries).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CmConfig::default();
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(config.ring_depth, DEFAULT_RING_DEPTH);
    }

    #[test]
    fn test_scaled_backoff_monotonic() {
        let base = Duration::from_millis(100);
        let mut prev = Duration::ZERO;
        for retries in 0..40 {
            let scaled = CmConfig::scaled(base, retries);
            assert!(scaled >= prev, "backoff must be non-decreasing");
            prev = scaled;
        }
    }

    #[test]
    fn test_scaled_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(CmConfig::scaled(base, 0), Duration::from_millis(100));
        assert_eq!(CmConfig::scaled(base, 1), Duration::from_millis(200));
        assert_eq!(CmConfig::scaled(base, 3), Duration::from_millis(800));
    }
}
