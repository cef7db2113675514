// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! The dispatch loop
//!
//! One background thread per transport context. Each iteration:
//!
//! 1. drains pending async device events (logged; fatal ones flagged),
//! 2. drains the receive ring through decode -> demux -> state handler,
//! 3. runs the retry sweep,
//! 4. reclaims objects (`Destroy`-marked, or terminal with no consumer
//!    handle left), releasing their port registry bits,
//! 5. parks on the wake notifier, bounded by the nearest retry deadline.
//!
//! Consumer threads never remove table entries themselves; they mark and
//! signal, which is what makes object reclamation race-free.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cm::context::CmCore;
use crate::engine::timer;
use crate::{Error, Result};

/// Park interval when the table is completely empty; any activity wakes
/// the loop immediately through the notifier.
const EMPTY_PARK: Duration = Duration::from_secs(1);

/// Spawn the dispatch thread for `core`.
pub(crate) fn spawn(core: Arc<CmCore>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("udcm-dispatch".to_string())
        .spawn(move || run(&core))
        .map_err(Error::IoError)
}

fn run(core: &CmCore) {
    log::debug!("[DISPATCH] thread up");
    loop {
        if core.shutdown.load(Ordering::SeqCst) {
            break;
        }

        while let Some(event) = core.qp.poll_async_event() {
            if event.is_fatal() {
                log::warn!("[DISPATCH] fatal device event: {:?}", event);
            } else {
                log::debug!("[DISPATCH] device event: {:?}", event);
            }
        }

        core.process_inbound();
        let next_deadline = timer::sweep(core);

        let reclaimed = core.table.sweep(|obj| {
            if obj.owns_port() {
                core.ports.release(obj.local_port());
            }
        });
        if reclaimed > 0 {
            log::debug!("[DISPATCH] reclaimed {} object(s)", reclaimed);
        }

        if core.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let timeout = match next_deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1)),
            None if core.table.is_empty() => EMPTY_PARK,
            // Objects exist but none has a pending deadline: short fixed
            // scan so terminal objects still get reclaimed promptly.
            None => core.config.idle_scan_interval,
        };
        core.wake.wait_timeout(timeout);
    }
    log::debug!("[DISPATCH] thread down");
}
