// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM send/receive rings
//!
//! A fixed number of receive credits is kept permanently posted on the CM
//! queue pair (reposted as soon as each datagram is copied out), and a
//! fixed number of send slots is recycled as send completions retire them.
//!
//! Send completions are polled lazily: only when the ring is momentarily
//! full does `send()` harvest them, yielding the thread a bounded number
//! of rounds before giving up with `Error::RingFull`. `recv()` never
//! blocks and is only called from the dispatch loop.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SEND_FULL_YIELD_ROUNDS;
use crate::transport::verbs::{AhId, DatagramQp};
use crate::{Error, Result};

/// Receive work ids live in a separate space from send slot ids so a
/// host bug mixing them up is immediately visible in logs.
const RECV_WR_BASE: u64 = 1 << 32;

/// Fixed-depth send/receive rings over the CM unreliable-datagram QP.
pub struct CmRing {
    qp: Arc<dyn DatagramQp>,
    depth: usize,
    /// Free send slot ids (`0..depth`). Popped on send, refilled from
    /// polled completions.
    free_send: Mutex<Vec<u64>>,
}

impl CmRing {
    /// Build the rings and post every receive credit.
    pub fn new(qp: Arc<dyn DatagramQp>, depth: usize) -> Result<Self> {
        for slot in 0..depth {
            qp.post_recv(RECV_WR_BASE + slot as u64)?;
        }
        log::debug!("[RING] posted {} receive credits", depth);
        Ok(Self {
            qp,
            depth,
            free_send: Mutex::new((0..depth as u64).collect()),
        })
    }

    /// Ring depth (send slots; the receive side is sized identically).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Send one CM datagram addressed via `ah`.
    ///
    /// Synchronous with respect to slot acquisition only: blocks just long
    /// enough to poll outstanding completions when the ring is full, then
    /// fails with [`Error::RingFull`]. Wire delivery remains asynchronous.
    pub fn send(&self, ah: AhId, payload: &[u8]) -> Result<()> {
        let wr_id = self.acquire_send_slot()?;
        match self.qp.post_send(ah, wr_id, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The post never reached the wire; the slot is still ours.
                self.free_send.lock().push(wr_id);
                Err(e)
            }
        }
    }

    /// Harvest one received datagram and repost its credit.
    ///
    /// Returns `None` when no completion is ready; never blocks.
    pub fn recv(&self) -> Option<Vec<u8>> {
        let msg = self.qp.poll_recv()?;
        if let Err(e) = self.qp.post_recv(msg.wr_id) {
            // A lost credit shrinks the receive ring; retries keep the
            // protocol alive, so warn rather than fail.
            log::warn!("[RING] repost of receive credit {:#x} failed: {}", msg.wr_id, e);
        }
        Some(msg.data)
    }

    fn acquire_send_slot(&self) -> Result<u64> {
        let mut scratch: Vec<u64> = Vec::new();
        for round in 0..=SEND_FULL_YIELD_ROUNDS {
            {
                let mut free = self.free_send.lock();
                if let Some(id) = free.pop() {
                    return Ok(id);
                }
                // Ring momentarily full: poll retired completions now.
                scratch.clear();
                self.qp.poll_send(&mut scratch);
                if !scratch.is_empty() {
                    free.extend_from_slice(&scratch);
                    if let Some(id) = free.pop() {
                        return Ok(id);
                    }
                }
            }
            if round < SEND_FULL_YIELD_ROUNDS {
                std::thread::yield_now();
            }
        }
        log::warn!("[RING] send ring full after {} poll rounds", SEND_FULL_YIELD_ROUNDS);
        Err(Error::RingFull)
    }
}
