// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 udcm contributors

//! CM message encoder/decoder
//!
//! One fixed-layout message carries every protocol operation. Encoding
//! always succeeds (lengths are validated when the message is built);
//! decoding fails closed on anything that cannot be trusted.

use super::constants::*;
use crate::transport::verbs::AddressVector;

/// CM operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CmOpcode {
    /// Connection request.
    Req = CM_OP_REQ,
    /// Connection reply.
    Rep = CM_OP_REP,
    /// Consumer reject (carries consumer data).
    RejUser = CM_OP_REJ_USER,
    /// Protocol reject (stale/duplicate, no consumer data).
    RejCm = CM_OP_REJ_CM,
    /// Ready-to-use acknowledgment.
    Rtu = CM_OP_RTU,
    /// Disconnect request.
    Dreq = CM_OP_DREQ,
    /// Disconnect reply.
    Drep = CM_OP_DREP,
}

impl CmOpcode {
    /// Map a wire value to an opcode, `None` for anything unknown.
    #[must_use]
    pub fn from_wire(op: u16) -> Option<Self> {
        match op {
            CM_OP_REQ => Some(CmOpcode::Req),
            CM_OP_REP => Some(CmOpcode::Rep),
            CM_OP_REJ_USER => Some(CmOpcode::RejUser),
            CM_OP_REJ_CM => Some(CmOpcode::RejCm),
            CM_OP_RTU => Some(CmOpcode::Rtu),
            CM_OP_DREQ => Some(CmOpcode::Dreq),
            CM_OP_DREP => Some(CmOpcode::Drep),
            _ => None,
        }
    }
}

impl std::fmt::Display for CmOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CmOpcode::Req => "REQ",
            CmOpcode::Rep => "REP",
            CmOpcode::RejUser => "REJ_USER",
            CmOpcode::RejCm => "REJ_CM",
            CmOpcode::Rtu => "RTU",
            CmOpcode::Dreq => "DREQ",
            CmOpcode::Drep => "DREP",
        };
        f.write_str(name)
    }
}

/// Why an inbound datagram was rejected by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the fixed header.
    TooShort(usize),
    /// Version field does not match [`CM_PROTO_VERSION`].
    BadVersion(u16),
    /// Operation code outside the defined set.
    UnknownOp(u16),
    /// Declared private-data length exceeds [`MAX_PRIVATE_DATA`] or the buffer.
    BadPrivateDataLen(u16),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::TooShort(len) => write!(f, "datagram too short: {} bytes", len),
            DecodeError::BadVersion(ver) => {
                write!(f, "version mismatch: got {}, expect {}", ver, CM_PROTO_VERSION)
            }
            DecodeError::UnknownOp(op) => write!(f, "unknown operation code {}", op),
            DecodeError::BadPrivateDataLen(len) => {
                write!(f, "bad private-data length {} (max {})", len, MAX_PRIVATE_DATA)
            }
        }
    }
}

/// One CM wire message.
///
/// The same layout carries all seven operations; fields irrelevant to an
/// operation are zero on the wire (RTU and DREQ/DREP carry no private
/// data, REJ_CM carries none by definition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmMessage {
    /// Operation code.
    pub op: CmOpcode,
    /// Sender's CM port.
    pub sport: u16,
    /// Destination CM port.
    pub dport: u16,
    /// Sender's data-path QPN.
    pub sqpn: u32,
    /// Destination data-path QPN.
    pub dqpn: u32,
    /// Sender's link address (LID, CM UD QPN, GID).
    pub saddr: AddressVector,
    /// Destination link address as known to the sender.
    pub daddr: AddressVector,
    p_size: u16,
    p_data: [u8; MAX_PRIVATE_DATA],
}

impl CmMessage {
    /// Build a message with no private data.
    #[must_use]
    pub fn new(op: CmOpcode) -> Self {
        Self {
            op,
            sport: 0,
            dport: 0,
            sqpn: 0,
            dqpn: 0,
            saddr: AddressVector::default(),
            daddr: AddressVector::default(),
            p_size: 0,
            p_data: [0u8; MAX_PRIVATE_DATA],
        }
    }

    /// Attach consumer private data, validating the length.
    pub fn set_private_data(&mut self, data: &[u8]) -> crate::Result<()> {
        if data.len() > MAX_PRIVATE_DATA {
            return Err(crate::Error::PrivateDataTooLarge(data.len()));
        }
        self.p_data[..data.len()].copy_from_slice(data);
        self.p_data[data.len()..].fill(0);
        self.p_size = data.len() as u16;
        Ok(())
    }

    /// The private-data payload carried by this message.
    #[must_use]
    pub fn private_data(&self) -> &[u8] {
        &self.p_data[..usize::from(self.p_size)]
    }

    /// Encode into `buf`, returning the number of wire bytes.
    ///
    /// Only the populated prefix of the private-data region goes on the
    /// wire; the fixed header is always present.
    pub fn encode(&self, buf: &mut [u8; CM_MSG_LEN]) -> usize {
        buf.fill(0);
        buf[OFF_VER..OFF_VER + 2].copy_from_slice(&CM_PROTO_VERSION.to_be_bytes());
        buf[OFF_OP..OFF_OP + 2].copy_from_slice(&(self.op as u16).to_be_bytes());
        buf[OFF_SPORT..OFF_SPORT + 2].copy_from_slice(&self.sport.to_be_bytes());
        buf[OFF_DPORT..OFF_DPORT + 2].copy_from_slice(&self.dport.to_be_bytes());
        buf[OFF_SQPN..OFF_SQPN + 4].copy_from_slice(&self.sqpn.to_be_bytes());
        buf[OFF_DQPN..OFF_DQPN + 4].copy_from_slice(&self.dqpn.to_be_bytes());
        buf[OFF_PSIZE..OFF_PSIZE + 2].copy_from_slice(&self.p_size.to_be_bytes());
        encode_addr(&mut buf[OFF_SADDR..OFF_SADDR + ADDR_BLOCK_LEN], &self.saddr);
        encode_addr(&mut buf[OFF_DADDR..OFF_DADDR + ADDR_BLOCK_LEN], &self.daddr);
        let p_size = usize::from(self.p_size);
        buf[OFF_PDATA..OFF_PDATA + p_size].copy_from_slice(&self.p_data[..p_size]);
        OFF_PDATA + p_size
    }

    /// Decode a received datagram, failing closed on anything untrusted.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < OFF_PDATA {
            return Err(DecodeError::TooShort(buf.len()));
        }
        let ver = read_u16(buf, OFF_VER);
        if ver != CM_PROTO_VERSION {
            return Err(DecodeError::BadVersion(ver));
        }
        let op_raw = read_u16(buf, OFF_OP);
        let op = CmOpcode::from_wire(op_raw).ok_or(DecodeError::UnknownOp(op_raw))?;
        let p_size = read_u16(buf, OFF_PSIZE);
        // Never trust a declared length: bound by both the protocol maximum
        // and the bytes actually received.
        if usize::from(p_size) > MAX_PRIVATE_DATA || OFF_PDATA + usize::from(p_size) > buf.len() {
            return Err(DecodeError::BadPrivateDataLen(p_size));
        }

        let mut p_data = [0u8; MAX_PRIVATE_DATA];
        p_data[..usize::from(p_size)]
            .copy_from_slice(&buf[OFF_PDATA..OFF_PDATA + usize::from(p_size)]);

        Ok(Self {
            op,
            sport: read_u16(buf, OFF_SPORT),
            dport: read_u16(buf, OFF_DPORT),
            sqpn: read_u32(buf, OFF_SQPN),
            dqpn: read_u32(buf, OFF_DQPN),
            saddr: decode_addr(&buf[OFF_SADDR..OFF_SADDR + ADDR_BLOCK_LEN]),
            daddr: decode_addr(&buf[OFF_DADDR..OFF_DADDR + ADDR_BLOCK_LEN]),
            p_size,
            p_data,
        })
    }
}

fn encode_addr(buf: &mut [u8], addr: &AddressVector) {
    buf[0..2].copy_from_slice(&addr.lid.to_be_bytes());
    // bytes 2..4 reserved
    buf[4..8].copy_from_slice(&addr.qpn.to_be_bytes());
    buf[8..24].copy_from_slice(&addr.gid);
}

fn decode_addr(buf: &[u8]) -> AddressVector {
    let mut gid = [0u8; 16];
    gid.copy_from_slice(&buf[8..24]);
    AddressVector {
        lid: u16::from_be_bytes([buf[0], buf[1]]),
        qpn: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        gid,
    }
}

#[inline]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_addr(seed: u8) -> AddressVector {
        AddressVector {
            lid: u16::from(seed) << 4,
            qpn: u32::from(seed) * 3 + 1,
            gid: [seed; 16],
        }
    }

    #[test]
    fn test_round_trip_all_fields() {
        let mut msg = CmMessage::new(CmOpcode::Req);
        msg.sport = 0xBEEF;
        msg.dport = 500;
        msg.sqpn = 0x0012_3456;
        msg.dqpn = 0x00AB_CDEF;
        msg.saddr = sample_addr(7);
        msg.daddr = sample_addr(9);
        msg.set_private_data(b"hello").expect("5 bytes fits");

        let mut buf = [0u8; CM_MSG_LEN];
        let len = msg.encode(&mut buf);
        assert_eq!(len, OFF_PDATA + 5);

        let decoded = CmMessage::decode(&buf[..len]).expect("decode");
        assert_eq!(decoded, msg);
        assert_eq!(decoded.private_data(), b"hello");
    }

    #[test]
    fn test_round_trip_max_private_data() {
        let payload: Vec<u8> = (0..MAX_PRIVATE_DATA as u8).collect();
        let mut msg = CmMessage::new(CmOpcode::Rep);
        msg.set_private_data(&payload).expect("max fits");

        let mut buf = [0u8; CM_MSG_LEN];
        let len = msg.encode(&mut buf);
        assert_eq!(len, CM_MSG_LEN);

        let decoded = CmMessage::decode(&buf[..len]).expect("decode");
        assert_eq!(decoded.private_data(), payload.as_slice());
    }

    #[test]
    fn test_private_data_too_large_rejected() {
        let mut msg = CmMessage::new(CmOpcode::Req);
        let oversized = vec![0u8; MAX_PRIVATE_DATA + 1];
        assert!(msg.set_private_data(&oversized).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut buf = [0u8; CM_MSG_LEN];
        let len = CmMessage::new(CmOpcode::Rtu).encode(&mut buf);
        buf[OFF_VER..OFF_VER + 2].copy_from_slice(&0xFF01u16.to_be_bytes());
        assert_eq!(
            CmMessage::decode(&buf[..len]),
            Err(DecodeError::BadVersion(0xFF01))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        let mut buf = [0u8; CM_MSG_LEN];
        let len = CmMessage::new(CmOpcode::Rtu).encode(&mut buf);
        buf[OFF_OP..OFF_OP + 2].copy_from_slice(&99u16.to_be_bytes());
        assert_eq!(CmMessage::decode(&buf[..len]), Err(DecodeError::UnknownOp(99)));
    }

    #[test]
    fn test_decode_rejects_oversized_pdata_claim() {
        let mut buf = [0u8; CM_MSG_LEN];
        let len = CmMessage::new(CmOpcode::Req).encode(&mut buf);
        // Claim more private data than the protocol maximum.
        buf[OFF_PSIZE..OFF_PSIZE + 2].copy_from_slice(&200u16.to_be_bytes());
        assert_eq!(
            CmMessage::decode(&buf[..len]),
            Err(DecodeError::BadPrivateDataLen(200))
        );
    }

    #[test]
    fn test_decode_rejects_pdata_beyond_buffer() {
        let mut msg = CmMessage::new(CmOpcode::Req);
        msg.set_private_data(&[1, 2, 3, 4]).expect("fits");
        let mut buf = [0u8; CM_MSG_LEN];
        let len = msg.encode(&mut buf);
        // Truncate the datagram below the declared private-data length.
        assert_eq!(
            CmMessage::decode(&buf[..len - 2]),
            Err(DecodeError::BadPrivateDataLen(4))
        );
    }

    #[test]
    fn test_decode_rejects_short_header() {
        assert_eq!(CmMessage::decode(&[0u8; 10]), Err(DecodeError::TooShort(10)));
    }

    #[test]
    fn test_wire_offsets_are_big_endian() {
        let mut msg = CmMessage::new(CmOpcode::Dreq);
        msg.sport = 0x0102;
        msg.sqpn = 0x0A0B_0C0D;
        let mut buf = [0u8; CM_MSG_LEN];
        msg.encode(&mut buf);
        assert_eq!(&buf[OFF_VER..OFF_VER + 2], &[0x00, 0x01]);
        assert_eq!(&buf[OFF_OP..OFF_OP + 2], &[0x00, 0x06]);
        assert_eq!(&buf[OFF_SPORT..OFF_SPORT + 2], &[0x01, 0x02]);
        assert_eq!(&buf[OFF_SQPN..OFF_SQPN + 4], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }
}
