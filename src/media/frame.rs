//! Media frames handed in by the capture side
//!
//! The payload is opaque to this crate: an already-encoded image or a raw
//! PCM chunk. The metadata travels alongside for logging and statistics only;
//! it is not part of the wire format.

use bytes::Bytes;

use crate::protocol::PacketKind;

/// Metadata describing where a payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfo {
    /// Encoded image
    Video { width: u32, height: u32, quality: u8 },
    /// PCM chunk
    Audio { sample_rate: u32, channels: u16 },
    /// Application-defined control message
    Control,
}

/// One unit of media to broadcast
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Opaque payload
    pub data: Bytes,
    /// Source metadata
    pub info: FrameInfo,
}

impl MediaFrame {
    /// An encoded video frame
    pub fn video(data: impl Into<Bytes>, width: u32, height: u32, quality: u8) -> Self {
        Self {
            data: data.into(),
            info: FrameInfo::Video {
                width,
                height,
                quality,
            },
        }
    }

    /// A raw PCM audio chunk
    pub fn audio(data: impl Into<Bytes>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: data.into(),
            info: FrameInfo::Audio {
                sample_rate,
                channels,
            },
        }
    }

    /// A control message
    pub fn control(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            info: FrameInfo::Control,
        }
    }

    /// Packet kind this frame is sent as
    pub fn kind(&self) -> PacketKind {
        match self.info {
            FrameInfo::Video { .. } => PacketKind::Video,
            FrameInfo::Audio { .. } => PacketKind::Audio,
            FrameInfo::Control => PacketKind::Control,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
