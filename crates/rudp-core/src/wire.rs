//! # RUDP Wire Format
//!
//! Every outbound datagram is a 4-byte magic prefix followed by the encoded
//! packet body. Receivers reject datagrams whose leading bytes don't match;
//! everything past the magic prefix is a flat, length-tagged encoding of the
//! fields listed in spec §3 — nothing that isn't serialized (`src`, `dst`,
//! `received_at`, `confirmed`) is written to the wire.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Magic (DE AD BE EF)                     |
//! +-------+-------+-------------------------------------------- -+
//! | Type  | Flags |                Sequence (32)                 |
//! +-------+-------+-----------------------------------------------
//! |                      Message Id (32)                        |
//! +---------------------------------------------------------------
//! |                      Fragment Qty (32)                      |
//! +---------------------------------------------------------------
//! |      Data Length (32)     |         Data (variable)          |
//! +---------------------------------------------------------------
//! |     Ack Count (32)        |    Ack Sequences (32 each)        |
//! +---------------------------------------------------------------
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use quanta::Instant;
use std::fmt;

use crate::error::DecodeError;
use crate::peer::PeerId;

/// Magic prefix every RUDP datagram must begin with.
pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Minimum possible encoded body size (no data, no acks).
pub const MIN_BODY_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 4 + 4;

// ─── Packet Type ─────────────────────────────────────────────────────────

/// What kind of packet this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Connection handshake.
    Syn = 0,
    /// Pure acknowledgement, no payload.
    Ack = 1,
    /// User data.
    Dat = 2,
    /// Keep-alive, no payload.
    Nul = 3,
    /// Connection reset.
    Rst = 4,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketType::Syn),
            1 => Some(PacketType::Ack),
            2 => Some(PacketType::Dat),
            3 => Some(PacketType::Nul),
            4 => Some(PacketType::Rst),
            _ => None,
        }
    }
}

// ─── Flags ───────────────────────────────────────────────────────────────

/// Orthogonal markers on top of `PacketType`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(u8);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Marks SYN|ACK handshake completion.
    pub const ACK: PacketFlags = PacketFlags(0b01);
    /// Marks a server sequence-overflow reset.
    pub const RST: PacketFlags = PacketFlags(0b10);

    pub fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PacketFlags) {
        self.0 |= other.0;
    }

    fn bits(self) -> u8 {
        self.0
    }

    fn from_bits(b: u8) -> Self {
        PacketFlags(b & 0b11)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = PacketFlags;
    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(PacketFlags::ACK) {
            parts.push("ACK");
        }
        if self.contains(PacketFlags::RST) {
            parts.push("RST");
        }
        if parts.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

// ─── Packet ──────────────────────────────────────────────────────────────

/// An in-memory packet record. `src`, `dst`, `received_at`, and `confirmed`
/// are local bookkeeping and are never placed on the wire.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Where this packet came from (set on receipt, not serialized).
    pub src: Option<PeerId>,
    /// Where this packet is going (set on send, not serialized).
    pub dst: Option<PeerId>,
    /// When this packet was locally received (not serialized).
    pub received_at: Option<Instant>,
    /// Whether this packet has already been confirmed (not serialized).
    pub confirmed: bool,

    pub seq: u32,
    pub id: u32,
    pub qty: u32,
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub data: Bytes,
    pub ack: Vec<u32>,
}

impl Packet {
    /// Construct a bare packet with the given type and sequence; everything
    /// else defaults (no data, no acks, no flags).
    pub fn new(packet_type: PacketType, seq: u32) -> Self {
        Packet {
            src: None,
            dst: None,
            received_at: None,
            confirmed: false,
            seq,
            id: 0,
            qty: 0,
            packet_type,
            flags: PacketFlags::NONE,
            data: Bytes::new(),
            ack: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_qty(mut self, qty: u32) -> Self {
        self.qty = qty;
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_ack(mut self, ack: Vec<u32>) -> Self {
        self.ack = ack;
        self
    }

    /// Is this packet a member of a fragmented message (`qty > 0`)?
    pub fn is_fragment(&self) -> bool {
        self.qty > 0
    }

    /// Encode the full datagram: magic prefix + body. `src`/`dst`/
    /// `received_at`/`confirmed` are intentionally omitted.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            MAGIC.len() + MIN_BODY_SIZE + self.data.len() + self.ack.len() * 4,
        );
        buf.extend_from_slice(&MAGIC);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.seq);
        buf.put_u32(self.id);
        buf.put_u32(self.qty);
        buf.put_u32(self.data.len() as u32);
        buf.extend_from_slice(&self.data);
        buf.put_u32(self.ack.len() as u32);
        for seq in &self.ack {
            buf.put_u32(*seq);
        }
        buf
    }

    /// Decode a complete datagram (magic prefix + body). Returns
    /// `DecodeError::BadMagic` if the prefix doesn't match and
    /// `DecodeError::MalformedBody` if the body is truncated or invalid.
    pub fn decode(raw: &[u8]) -> Result<Packet, DecodeError> {
        if raw.len() < MAGIC.len() {
            return Err(DecodeError::Truncated);
        }
        if raw[..MAGIC.len()] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let mut buf = &raw[MAGIC.len()..];
        Self::decode_body(&mut buf)
    }

    fn decode_body(buf: &mut impl Buf) -> Result<Packet, DecodeError> {
        if buf.remaining() < MIN_BODY_SIZE {
            return Err(DecodeError::MalformedBody);
        }
        let packet_type =
            PacketType::from_byte(buf.get_u8()).ok_or(DecodeError::MalformedBody)?;
        let flags = PacketFlags::from_bits(buf.get_u8());
        let seq = buf.get_u32();
        let id = buf.get_u32();
        let qty = buf.get_u32();

        let data_len = buf.get_u32() as usize;
        if buf.remaining() < data_len {
            return Err(DecodeError::MalformedBody);
        }
        let data = buf.copy_to_bytes(data_len);

        if buf.remaining() < 4 {
            return Err(DecodeError::MalformedBody);
        }
        let ack_count = buf.get_u32() as usize;
        if buf.remaining() < ack_count * 4 {
            return Err(DecodeError::MalformedBody);
        }
        let mut ack = Vec::with_capacity(ack_count);
        for _ in 0..ack_count {
            ack.push(buf.get_u32());
        }

        Ok(Packet {
            src: None,
            dst: None,
            received_at: None,
            confirmed: false,
            seq,
            id,
            qty,
            packet_type,
            flags,
            data,
            ack,
        })
    }
}
