// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM port registry
//!
//! Allocates local connection identifiers ("ports") from the full 16-bit
//! space, backing both listener service ids and the locally-chosen port of
//! each active connection attempt. Port 0 is reserved and never handed out.
//!
//! One registry per transport context; never process-wide state.

use parking_lot::Mutex;

use crate::{Error, Result};

const WORD_BITS: usize = 64;
const PORT_WORDS: usize = (u16::MAX as usize + 1) / WORD_BITS;

/// Bitmap allocator over the 16-bit CM port space.
pub struct PortRegistry {
    bits: Mutex<PortBitmap>,
}

struct PortBitmap {
    /// One bit per port, set = allocated. Port 0 is permanently set.
    words: Box<[u64; PORT_WORDS]>,
    allocated: usize,
}

impl PortRegistry {
    /// Create a registry with every port free (except reserved port 0).
    #[must_use]
    pub fn new() -> Self {
        let mut words = Box::new([0u64; PORT_WORDS]);
        words[0] = 1; // port 0 reserved
        Self {
            bits: Mutex::new(PortBitmap { words, allocated: 0 }),
        }
    }

    /// Allocate a port.
    ///
    /// `requested == 0` picks the highest-numbered free port; a nonzero
    /// request returns exactly that port or fails with
    /// [`Error::PortBusy`]. Exhaustion fails with
    /// [`Error::PortSpaceExhausted`] and leaves prior allocations intact.
    pub fn allocate(&self, requested: u16) -> Result<u16> {
        let mut bits = self.bits.lock();
        if requested != 0 {
            if bits.is_set(requested) {
                return Err(Error::PortBusy(requested));
            }
            bits.set(requested);
            log::debug!("[PORTS] allocated requested port {}", requested);
            return Ok(requested);
        }

        // Scan downward from the top word: dynamic ports come from the
        // high end so low service ids stay available for listeners.
        for word_idx in (0..PORT_WORDS).rev() {
            let word = bits.words[word_idx];
            if word == u64::MAX {
                continue;
            }
            let free_bit = (WORD_BITS - 1) - (!word).leading_zeros() as usize;
            let port = (word_idx * WORD_BITS + free_bit) as u16;
            bits.set(port);
            log::debug!("[PORTS] allocated dynamic port {}", port);
            return Ok(port);
        }
        Err(Error::PortSpaceExhausted)
    }

    /// Release a port back to the pool. Double release is logged, not fatal.
    pub fn release(&self, port: u16) {
        if port == 0 {
            return;
        }
        let mut bits = self.bits.lock();
        if bits.is_set(port) {
            bits.clear(port);
        } else {
            log::warn!("[PORTS] double release of port {}", port);
        }
    }

    /// Whether `port` is currently allocated.
    #[must_use]
    pub fn is_allocated(&self, port: u16) -> bool {
        self.bits.lock().is_set(port)
    }

    /// Number of allocated ports (excludes the reserved port 0).
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.bits.lock().allocated
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortBitmap {
    fn is_set(&self, port: u16) -> bool {
        let idx = usize::from(port);
        self.words[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    fn set(&mut self, port: u16) {
        let idx = usize::from(port);
        self.words[idx / WORD_BITS] |= 1u64 << (idx % WORD_BITS);
        self.allocated += 1;
    }

    fn clear(&mut self, port: u16) {
        let idx = usize::from(port);
        self.words[idx / WORD_BITS] &= !(1u64 << (idx % WORD_BITS));
        self.allocated -= 1;
    }
}
