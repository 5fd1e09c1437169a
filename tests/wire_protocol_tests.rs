//! Framing over real byte streams

mod common;

use common::test_data::awkward_values;
use gambit::messages::tlv::{FRAME_SENTINEL, HEADER_LEN};
use gambit::messages::{
    decode, encode, FrameReader, FrameWriter, FramingError, Tag, Tlv, WireConfig,
    WireProtocolError,
};
use tokio::io::AsyncWriteExt;

#[test]
fn test_awkward_values_survive_encoding() {
    for value in awkward_values() {
        let frame = encode(Tag::Ack.as_byte(), &value).unwrap();
        assert_eq!(*frame.last().unwrap(), FRAME_SENTINEL);

        // No sentinel may appear before the terminator
        let escaped = &frame[HEADER_LEN..frame.len() - 1];
        assert!(!escaped.contains(&FRAME_SENTINEL), "value {:?}", value);

        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded.tag, Tag::Ack.as_byte());
        assert_eq!(decoded.value, value);
    }
}

#[test]
fn test_escape_sequences_are_distinct_from_literals() {
    let newline = encode(0x21, b"\n").unwrap();
    let literal = encode(0x21, b"\\n").unwrap();
    assert_ne!(newline, literal);
    assert_eq!(decode(&newline).unwrap().value, b"\n");
    assert_eq!(decode(&literal).unwrap().value, b"\\n");
}

#[test]
fn test_length_counts_escaped_bytes() {
    let frame = encode(0x21, b"a\nb").unwrap();
    assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 4);
    assert_eq!(frame.len(), HEADER_LEN + 4 + 1);
}

#[test]
fn test_decode_rejects_truncated_input() {
    assert_eq!(decode(&[0x21, 0x00]), Err(FramingError::TooShort { len: 2 }));
    assert_eq!(
        decode(&[0x21, 0x00, 0x05, b'a', b'b']),
        Err(FramingError::LengthMismatch {
            declared: 5,
            available: 2
        })
    );
}

#[test]
fn test_value_too_long_is_refused() {
    // Every sentinel doubles in size once escaped
    let value = vec![b'\n'; 40_000];
    assert!(matches!(
        encode(0x21, &value),
        Err(FramingError::ValueTooLong { len: 80_000 })
    ));
}

#[tokio::test]
async fn test_frames_round_trip_through_a_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let mut writer = FrameWriter::new(client);
    let mut reader = FrameReader::new(server);

    let frames: Vec<Tlv> = awkward_values()
        .into_iter()
        .map(|value| Tlv::new(Tag::MoveReceived, value))
        .collect();

    let sent = frames.clone();
    let write_task = tokio::spawn(async move {
        for frame in &sent {
            writer.write_frame(frame).await.unwrap();
        }
        writer.shutdown().await.unwrap();
    });

    for expected in &frames {
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(&frame, expected);
    }
    assert!(reader.read_frame().await.unwrap().is_none());
    write_task.await.unwrap();
}

#[tokio::test]
async fn test_header_byte_equal_to_sentinel() {
    // A ten byte value makes the low length byte 0x0A
    let value = b"0123456789".to_vec();
    let bytes = encode(Tag::Ack.as_byte(), &value).unwrap();
    assert_eq!(bytes[2], FRAME_SENTINEL);

    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&bytes).await.unwrap();
    client.write_all(&encode(Tag::Ack.as_byte(), b"next").unwrap()).await.unwrap();

    let mut reader = FrameReader::new(server);
    assert_eq!(reader.read_frame().await.unwrap().unwrap().value, value);
    assert_eq!(reader.read_frame().await.unwrap().unwrap().value, b"next");
}

#[tokio::test]
async fn test_byte_by_byte_delivery() {
    let frame = Tlv::new(Tag::GameOver, b"fen\nwith\\odd;bytes".to_vec());
    let bytes = frame.encode().unwrap();

    let (mut client, server) = tokio::io::duplex(8);
    let writer = tokio::spawn(async move {
        for byte in bytes {
            client.write_all(&[byte]).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    let mut reader = FrameReader::new(server);
    assert_eq!(reader.read_frame().await.unwrap().unwrap(), frame);
    assert_eq!(reader.buffered(), 0);
    writer.await.unwrap();
}

#[tokio::test]
async fn test_oversized_frame_is_refused() {
    let (mut client, server) = tokio::io::duplex(4096);
    let bytes = encode(Tag::PlayMove.as_byte(), &[b'x'; 200]).unwrap();
    client.write_all(&bytes).await.unwrap();

    let mut reader = FrameReader::with_config(server, WireConfig::new(64, 4));
    assert!(matches!(
        reader.read_frame().await,
        Err(WireProtocolError::FrameTooLarge { size: 204, max_size: 64 })
    ));
}

#[tokio::test]
async fn test_stream_closed_mid_frame() {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&[0x21, 0x00, 0x08, b'e', b'4']).await.unwrap();
    drop(client);

    let mut reader = FrameReader::new(server);
    assert!(matches!(
        reader.read_frame().await,
        Err(WireProtocolError::UnexpectedEof { buffered: 5 })
    ));
}

#[tokio::test]
async fn test_missing_terminator_is_an_error() {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(&[0x21, 0x00, 0x02, b'e', b'4', b'!']).await.unwrap();

    let mut reader = FrameReader::new(server);
    assert!(matches!(
        reader.read_frame().await,
        Err(WireProtocolError::Framing(FramingError::MissingTerminator))
    ));
}
