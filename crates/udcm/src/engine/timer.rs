// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Retry/timer engine
//!
//! Every dispatch iteration scans the reply-expecting objects
//! (`RepPending`, `RtuPending`, `DreqPending`). A phase whose deadline
//! passed gets its stored message resent with exponential backoff
//! (`base << retries`); a phase out of budget is finalized — as
//! unreachable for establishment, as a completed teardown for disconnect,
//! where the peer is presumed gone rather than kept waiting forever.
//!
//! The sweep returns the minimum next deadline so the dispatch loop never
//! oversleeps a retransmission.

use std::time::{Duration, Instant};

use crate::cm::context::CmCore;
use crate::cm::metrics::CmMetrics;
use crate::cm::object::Connection;
use crate::cm::state::{CmEvent, CmState};
use crate::config::CmConfig;

/// What a finished phase owes the consumer.
enum Finalize {
    Nothing,
    Unreachable,
    Disconnected,
}

/// Scan all pending objects once; resend, finalize, and report the
/// earliest deadline still outstanding.
pub(crate) fn sweep(core: &CmCore) -> Option<Instant> {
    let now = Instant::now();
    let mut next: Option<Instant> = None;

    for obj in core.table.snapshot() {
        let mut finalize = Finalize::Nothing;
        {
            let mut inner = obj.lock();
            if !inner.state.expects_reply() {
                continue;
            }
            let Some(last_sent) = inner.last_sent else {
                continue;
            };

            let base = phase_timeout(&core.config, inner.state);
            let deadline = last_sent + CmConfig::scaled(base, inner.retries);
            if now < deadline {
                next = earliest(next, deadline);
                continue;
            }

            if inner.retries >= core.config.max_retries {
                let prev = inner.state;
                match prev.apply(CmEvent::RetriesExhausted) {
                    Ok(state) => inner.state = state,
                    Err(t) => {
                        log::warn!("[CM] {}", t);
                        continue;
                    }
                }
                CmMetrics::incr(&core.metrics.exhaustions);
                log::debug!(
                    "[CM] port {}: {:?} exhausted after {} resends",
                    obj.local_port(),
                    prev,
                    inner.retries
                );
                finalize = if prev == CmState::DreqPending {
                    Finalize::Disconnected
                } else {
                    Finalize::Unreachable
                };
            } else {
                match core.send_stored(&inner) {
                    Ok(()) => {
                        inner.note_resend();
                        CmMetrics::incr(&core.metrics.resends);
                        next = earliest(next, now + CmConfig::scaled(base, inner.retries));
                    }
                    Err(e) => {
                        // Resource failure inside the retry engine is a
                        // local failure of this attempt.
                        log::warn!("[CM] port {}: resend failed: {}", obj.local_port(), e);
                        let prev = inner.state;
                        match prev.apply(CmEvent::LocalFailure) {
                            Ok(state) => inner.state = state,
                            Err(t) => {
                                log::warn!("[CM] {}", t);
                                continue;
                            }
                        }
                        finalize = if prev == CmState::DreqPending {
                            Finalize::Disconnected
                        } else {
                            Finalize::Unreachable
                        };
                    }
                }
            }
        }

        match finalize {
            Finalize::Nothing => {}
            Finalize::Unreachable => {
                core.deliver(|sink| sink.on_unreachable(&Connection { obj: obj.clone() }));
            }
            Finalize::Disconnected => {
                core.deliver(|sink| sink.on_disconnected(&Connection { obj: obj.clone() }));
            }
        }
    }

    next
}

fn phase_timeout(config: &CmConfig, state: CmState) -> Duration {
    match state {
        CmState::RepPending => config.reply_timeout,
        CmState::RtuPending => config.rtu_timeout,
        CmState::DreqPending => config.disconnect_timeout,
        // expects_reply() gated the caller; anything else has no phase.
        _ => config.idle_scan_interval,
    }
}

fn earliest(current: Option<Instant>, candidate: Instant) -> Option<Instant> {
    Some(match current {
        Some(existing) => existing.min(candidate),
        None => candidate,
    })
}
