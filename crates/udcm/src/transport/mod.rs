// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM transport layer
//!
//! Everything between the state machine and the host's verbs provider:
//! - `verbs`: the two capability traits the host implements (`DatagramQp`
//!   for CM traffic, `DataPathQp` for per-connection programming) plus the
//!   link-address type
//! - `ring`: fixed-depth send/recv rings over the CM UD queue pair
//! - `ah_cache`: one cached address handle per peer
//! - `loopback`: an in-process fabric for tests and demos

pub mod ah_cache;
pub mod loopback;
pub mod ring;
pub mod verbs;

pub use ah_cache::AhCache;
pub use ring::CmRing;
pub use verbs::{AddressVector, AhId, AsyncEvent, DataPathQp, DatagramQp, RecvMsg};
