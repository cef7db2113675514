// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM wire protocol
//!
//! This module contains the fixed-layout connection-management message:
//! - Constants: opcodes, version, field offsets, size limits
//! - `CmMessage` encode/decode (big-endian, bit-exact between peers)
//!
//! Decode fails closed: a datagram with the wrong version, an unknown
//! opcode, or an oversized private-data claim is rejected before any field
//! is trusted.

pub mod constants;
pub mod message;

pub use constants::*;
pub use message::{CmMessage, CmOpcode, DecodeError};
