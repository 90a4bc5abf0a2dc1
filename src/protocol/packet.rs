//! Packet types and header encoding

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::ProtocolError;

/// Packet category carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Encoded video frame
    Video = 0,
    /// Raw PCM audio chunk
    Audio = 1,
    /// Out-of-band control message
    Control = 2,
}

impl PacketKind {
    /// All kinds, in wire order
    pub const ALL: [PacketKind; 3] = [PacketKind::Video, PacketKind::Audio, PacketKind::Control];

    /// Parse a kind byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketKind::Video),
            1 => Some(PacketKind::Audio),
            2 => Some(PacketKind::Control),
            _ => None,
        }
    }

    /// Wire value of this kind
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Dense index, usable for per-kind tables
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Video => write!(f, "video"),
            PacketKind::Audio => write!(f, "audio"),
            PacketKind::Control => write!(f, "control"),
        }
    }
}

/// Decoded and validated packet header
///
/// The kind byte is kept raw so that a packet with an unknown kind can still
/// be consumed whole, keeping the stream aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw kind byte
    pub kind: u8,
    /// Payload length in bytes, always within `1..=MAX_PAYLOAD_SIZE`
    pub length: usize,
    /// Sequence number
    pub sequence: u32,
}

impl PacketHeader {
    /// Parse and validate a 9-byte header
    pub fn parse(raw: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let mut buf = &raw[..];
        let kind = buf.get_u8();
        let length = buf.get_i32_le();
        let sequence = buf.get_u32_le();

        if length <= 0 || length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidFraming {
                length: length as i64,
            });
        }

        Ok(Self {
            kind,
            length: length as usize,
            sequence,
        })
    }

    /// Resolve the kind byte
    pub fn packet_kind(&self) -> Result<PacketKind, ProtocolError> {
        PacketKind::from_u8(self.kind).ok_or(ProtocolError::UnknownKind(self.kind))
    }
}

/// One framed unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet category
    pub kind: PacketKind,
    /// Per-kind sequence number assigned by the producer
    pub sequence: u32,
    /// Opaque payload (reference counted)
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, rejecting payloads the wire cannot carry
    pub fn new(kind: PacketKind, sequence: u32, payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidFraming {
                length: payload.len() as i64,
            });
        }

        Ok(Self {
            kind,
            sequence,
            payload,
        })
    }

    /// Total encoded size (header + payload)
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode header and payload into `buf`
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.kind.as_u8());
        buf.put_i32_le(self.payload.len() as i32);
        buf.put_u32_le(self.sequence);
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}
