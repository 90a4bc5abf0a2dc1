//! Property tests for the wire codec

use bytes::Bytes;
use proptest::prelude::*;

use framecast::error::{Error, ProtocolError};
use framecast::protocol::{read_packet, Packet, PacketKind, HEADER_SIZE};

fn kind() -> impl Strategy<Value = PacketKind> {
    prop_oneof![
        Just(PacketKind::Video),
        Just(PacketKind::Audio),
        Just(PacketKind::Control),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn decode_reproduces_encoded_packet(
        kind in kind(),
        sequence in any::<u32>(),
        payload in proptest::collection::vec(any::<u8>(), 1..4096),
    ) {
        let packet = Packet::new(kind, sequence, Bytes::from(payload)).unwrap();
        let encoded = packet.encode();
        prop_assert_eq!(encoded.len(), HEADER_SIZE + packet.payload.len());

        let mut reader = &encoded[..];
        let decoded = runtime().block_on(read_packet(&mut reader)).unwrap();

        prop_assert_eq!(decoded, packet);
        prop_assert!(reader.is_empty());
    }

    #[test]
    fn chunked_reads_decode_the_same(
        kind in kind(),
        sequence in any::<u32>(),
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        chunk in 1usize..16,
    ) {
        let packet = Packet::new(kind, sequence, Bytes::from(payload)).unwrap();
        let encoded = packet.encode();

        let mut builder = tokio_test::io::Builder::new();
        for piece in encoded.chunks(chunk) {
            builder.read(piece);
        }
        let mut reader = builder.build();

        let decoded = runtime().block_on(read_packet(&mut reader)).unwrap();
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn out_of_range_lengths_are_rejected(
        length in prop_oneof![Just(0i32), Just(-1i32), Just(10 * 1024 * 1024 + 1), i32::MIN..0],
        sequence in any::<u32>(),
    ) {
        let mut raw = vec![PacketKind::Video.as_u8()];
        raw.extend_from_slice(&length.to_le_bytes());
        raw.extend_from_slice(&sequence.to_le_bytes());
        raw.extend_from_slice(b"trailing bytes that must not be consumed");

        let mut reader = &raw[..];
        let result = runtime().block_on(read_packet(&mut reader));

        let rejected = matches!(
            result,
            Err(Error::Protocol(ProtocolError::InvalidFraming { .. }))
        );
        prop_assert!(rejected);
        prop_assert_eq!(reader.len(), raw.len() - HEADER_SIZE);
    }
}
