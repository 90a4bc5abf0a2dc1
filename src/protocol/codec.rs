//! Async packet decoding
//!
//! Reads loop over partial reads until the header or payload is complete. A
//! read that returns zero bytes before completion means the peer closed.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::constants::HEADER_SIZE;
use super::packet::{Packet, PacketHeader};
use crate::error::{ProtocolError, Result};

/// Fill `buf` from `reader`, looping on partial reads.
///
/// Returns the number of bytes read. A value smaller than `buf.len()` means
/// the stream ended first; `0` means it ended before any byte arrived.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one complete packet.
///
/// The header is validated before any payload byte is read, so a bad length
/// consumes exactly [`HEADER_SIZE`] bytes. A packet with an unknown kind is
/// read in full before [`ProtocolError::UnknownKind`] is returned, leaving the
/// stream positioned at the next header.
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; HEADER_SIZE];
    if read_full(reader, &mut raw).await? < HEADER_SIZE {
        return Err(ProtocolError::EndOfStream.into());
    }

    let header = PacketHeader::parse(&raw)?;

    let mut payload = BytesMut::zeroed(header.length);
    if read_full(reader, &mut payload).await? < header.length {
        return Err(ProtocolError::EndOfStream.into());
    }

    let kind = header.packet_kind()?;

    Ok(Packet {
        kind,
        sequence: header.sequence,
        payload: payload.freeze(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::Bytes;

    use super::*;
    use crate::error::Error;
    use crate::protocol::packet::PacketKind;
    use crate::protocol::MAX_PAYLOAD_SIZE;

    fn raw_header(kind: u8, length: i32, sequence: u32) -> Vec<u8> {
        let mut raw = vec![kind];
        raw.extend_from_slice(&length.to_le_bytes());
        raw.extend_from_slice(&sequence.to_le_bytes());
        raw
    }

    #[tokio::test]
    async fn test_read_packet_whole() {
        let packet = Packet::new(PacketKind::Video, 7, Bytes::from_static(b"jpeg-bytes")).unwrap();
        let mut cursor = Cursor::new(packet.encode().to_vec());

        let decoded = read_packet(&mut cursor).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_read_packet_one_byte_at_a_time() {
        let packet = Packet::new(PacketKind::Audio, 3, Bytes::from_static(&[1, 2, 3, 4, 5])).unwrap();
        let encoded = packet.encode();

        let mut builder = tokio_test::io::Builder::new();
        for byte in encoded.iter() {
            builder.read(std::slice::from_ref(byte));
        }
        let mut mock = builder.build();

        let decoded = read_packet(&mut mock).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_bad_length_consumes_only_header() {
        for length in [0, -1, (MAX_PAYLOAD_SIZE + 1) as i32] {
            let mut raw = raw_header(0, length, 1);
            raw.extend_from_slice(&[0xAA; 32]);
            let mut cursor = Cursor::new(raw);

            let result = read_packet(&mut cursor).await;
            assert!(matches!(
                result,
                Err(Error::Protocol(ProtocolError::InvalidFraming { .. }))
            ));
            assert_eq!(cursor.position(), HEADER_SIZE as u64);
        }
    }

    #[tokio::test]
    async fn test_empty_stream_is_end_of_stream() {
        let mut cursor = Cursor::new(Vec::new());
        let result = read_packet(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::EndOfStream))));
    }

    #[tokio::test]
    async fn test_truncated_header_is_end_of_stream() {
        let mut cursor = Cursor::new(vec![0, 4, 0]);
        let result = read_packet(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::EndOfStream))));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_end_of_stream() {
        let mut raw = raw_header(1, 10, 1);
        raw.extend_from_slice(&[0u8; 4]);
        let mut cursor = Cursor::new(raw);

        let result = read_packet(&mut cursor).await;
        assert!(matches!(result, Err(Error::Protocol(ProtocolError::EndOfStream))));
    }

    #[tokio::test]
    async fn test_unknown_kind_keeps_stream_aligned() {
        let mut raw = raw_header(9, 2, 1);
        raw.extend_from_slice(&[0xFF, 0xFF]);
        let next = Packet::new(PacketKind::Control, 2, Bytes::from_static(b"ok")).unwrap();
        raw.extend_from_slice(&next.encode());
        let mut cursor = Cursor::new(raw);

        let first = read_packet(&mut cursor).await;
        assert!(matches!(first, Err(Error::Protocol(ProtocolError::UnknownKind(9)))));

        let second = read_packet(&mut cursor).await.unwrap();
        assert_eq!(second, next);
    }

    #[tokio::test]
    async fn test_read_full_reports_short_read() {
        let mut cursor = Cursor::new(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let n = read_full(&mut cursor, &mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}
