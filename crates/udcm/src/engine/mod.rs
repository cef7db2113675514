// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! Background dispatch engine
//!
//! One dedicated thread per transport context owns all message reception,
//! retry evaluation, and the state transitions driven by either. It parks
//! on a level-triggered wake notifier with a timeout bounded by the
//! nearest retry deadline, so a retransmission is never late by more than
//! the scheduling jitter of one wake.
//!
//! # Components
//!
//! - **dispatch**: the loop itself (drain ring, retry sweep, reclaim sweep)
//! - **timer**: per-object deadline evaluation and resends
//! - **wake**: the coalescing notifier consumer threads and the host signal

pub mod dispatch;
pub mod timer;
pub mod wake;

pub use wake::WakeNotifier;
