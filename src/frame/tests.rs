//! Unit tests for frame headers, control frames and the wire codec.

use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::{
    CloseCode,
    ControlFrame,
    ControlKind,
    Frame,
    FragmentFrame,
    FragmentHeader,
    FrameCodec,
    MessageKind,
    ProtocolViolation,
    codec::apply_mask,
};
use crate::{config::Role, error::TransportError};

fn codec(role: Role, max: usize) -> FrameCodec {
    FrameCodec::new(role, NonZeroUsize::new(max).expect("non-zero"))
}

fn data(kind: MessageKind, fin: bool, payload: &'static [u8]) -> Frame {
    Frame::Data(FragmentFrame::new(
        FragmentHeader::first(kind, false, fin, payload.len()),
        Bytes::from_static(payload),
    ))
}

fn encode(codec: &mut FrameCodec, frame: Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).expect("encode frame");
    buf
}

#[test]
fn server_frames_are_unmasked() {
    let bytes = encode(&mut codec(Role::Server, 64), data(MessageKind::Binary, true, b"abc"));
    assert_eq!(&bytes[..], &[0x82, 0x03, b'a', b'b', b'c']);
}

#[test]
fn client_frames_are_masked_and_decode_on_the_server() {
    let mut client = codec(Role::Client, 64);
    let mut bytes = encode(&mut client, data(MessageKind::Text, false, b"hello"));
    assert_eq!(bytes[0], 0x01);
    assert_eq!(bytes[1], 0x80 | 5);
    assert_eq!(bytes.len(), 2 + 4 + 5);

    let frame = codec(Role::Server, 64)
        .decode(&mut bytes)
        .expect("decode")
        .expect("complete frame");
    let Frame::Data(fragment) = frame else {
        panic!("expected a data frame, got {frame:?}");
    };
    assert_eq!(fragment.payload(), b"hello");
    assert!(!fragment.header().fin());
    assert_eq!(fragment.header().kind(), Some(MessageKind::Text));
    assert!(bytes.is_empty());
}

#[rstest]
#[case::empty(0, 2)]
#[case::short_max(125, 2)]
#[case::extended_16_min(126, 4)]
#[case::extended_16_max(65_535, 4)]
#[case::extended_64(65_536, 10)]
fn lengths_use_the_minimal_encoding(#[case] len: usize, #[case] header_len: usize) {
    let mut server = codec(Role::Server, 70_000);
    let payload = Bytes::from(vec![7_u8; len]);
    let frame = Frame::Data(FragmentFrame::new(
        FragmentHeader::first(MessageKind::Binary, false, true, len),
        payload.clone(),
    ));
    let mut bytes = encode(&mut server, frame);
    assert_eq!(bytes.len(), header_len + len);

    let decoded = codec(Role::Client, 70_000)
        .decode(&mut bytes)
        .expect("decode")
        .expect("complete frame");
    let Frame::Data(fragment) = decoded else {
        panic!("expected a data frame");
    };
    assert_eq!(fragment.payload(), &payload[..]);
}

#[rstest]
#[case::reserved_bits(vec![0xA2, 0x80, 0, 0, 0, 0], ProtocolViolation::ReservedBits(0x20))]
#[case::reserved_opcode(vec![0x83, 0x80, 0, 0, 0, 0], ProtocolViolation::ReservedOpcode(0x3))]
#[case::unmasked(vec![0x82, 0x00], ProtocolViolation::UnmaskedFrame)]
#[case::fragmented_ping(vec![0x09, 0x80, 0, 0, 0, 0], ProtocolViolation::FragmentedControlFrame)]
#[case::long_ping(vec![0x89, 0x80 | 126, 0x00, 0x7E], ProtocolViolation::ControlFrameTooLong(126))]
#[case::non_minimal_16(vec![0x82, 0x80 | 126, 0x00, 0x05], ProtocolViolation::NonMinimalLength)]
#[case::non_minimal_64(
    vec![0x82, 0x80 | 127, 0, 0, 0, 0, 0, 0, 0x01, 0x00],
    ProtocolViolation::NonMinimalLength
)]
#[case::length_msb(
    vec![0x82, 0x80 | 127, 0x80, 0, 0, 0, 0, 0, 0, 0],
    ProtocolViolation::InvalidLength
)]
#[case::rsv1_on_continuation(
    vec![0xC0, 0x80, 0, 0, 0, 0],
    ProtocolViolation::CompressionMarkerOnContinuation
)]
#[case::rsv1_on_control(vec![0xC9, 0x80, 0, 0, 0, 0], ProtocolViolation::ReservedBits(0x40))]
#[case::one_byte_close(vec![0x88, 0x81, 0, 0, 0, 0, 0x03], ProtocolViolation::MalformedClose)]
fn server_rejects_malformed_frames(#[case] bytes: Vec<u8>, #[case] expected: ProtocolViolation) {
    let mut buf = BytesMut::from(&bytes[..]);
    match codec(Role::Server, 1024).decode(&mut buf) {
        Err(TransportError::Protocol(violation)) => assert_eq!(violation, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

#[test]
fn client_rejects_masked_frames() {
    let mut buf = BytesMut::from(&[0x82, 0x80, 1, 2, 3, 4][..]);
    assert!(matches!(
        codec(Role::Client, 64).decode(&mut buf),
        Err(TransportError::Protocol(ProtocolViolation::MaskedFrame))
    ));
}

#[test]
fn oversized_fragment_is_rejected_from_its_header() {
    // Only the header has arrived; the 200 byte payload never needs buffering.
    let mut buf = BytesMut::from(&[0x82, 0x80 | 126, 0x00, 0xC8][..]);
    match codec(Role::Server, 16).decode(&mut buf) {
        Err(TransportError::FragmentTooLarge { size, max }) => {
            assert_eq!((size, max), (200, 16));
        }
        other => panic!("expected FragmentTooLarge, got {other:?}"),
    }
}

#[test]
fn incomplete_frames_wait_for_more_bytes() {
    let mut server = codec(Role::Server, 64);
    let mut buf = BytesMut::from(&[0x82][..]);
    assert!(server.decode(&mut buf).expect("decode").is_none());
    buf.extend_from_slice(&[0x83, 0, 0, 0, 0, b'a']);
    assert!(server.decode(&mut buf).expect("decode").is_none());
    buf.extend_from_slice(b"bc");
    let frame = server.decode(&mut buf).expect("decode");
    assert!(matches!(frame, Some(Frame::Data(_))));
}

#[test]
fn eof_inside_a_frame_is_a_premature_close() {
    let mut buf = BytesMut::from(&[0x82, 0x85, 0, 0, 0, 0, b'a'][..]);
    assert!(matches!(
        codec(Role::Server, 64).decode_eof(&mut buf),
        Err(TransportError::PrematureClose)
    ));
    let mut empty = BytesMut::new();
    assert!(
        codec(Role::Server, 64)
            .decode_eof(&mut empty)
            .expect("clean eof")
            .is_none()
    );
}

#[test]
fn encoder_refuses_payloads_above_the_fragment_limit() {
    let mut server = codec(Role::Server, 2);
    let mut buf = BytesMut::new();
    let result = server.encode(data(MessageKind::Binary, true, b"abc"), &mut buf);
    assert!(matches!(
        result,
        Err(TransportError::FragmentTooLarge { size: 3, max: 2 })
    ));
    assert!(buf.is_empty());
}

#[test]
fn control_frames_interleave_with_fragments() {
    let mut client = codec(Role::Client, 64);
    let mut buf = encode(&mut client, data(MessageKind::Binary, false, b"one"));
    buf.extend_from_slice(&encode(&mut client, Frame::Control(ControlFrame::ping("hi"))));
    buf.extend_from_slice(&encode(
        &mut client,
        Frame::Data(FragmentFrame::new(
            FragmentHeader::continuation(true, 3),
            Bytes::from_static(b"two"),
        )),
    ));

    let mut server = codec(Role::Server, 64);
    let mut frames = Vec::new();
    while let Some(frame) = server.decode(&mut buf).expect("decode") {
        frames.push(frame);
    }
    assert_eq!(frames.len(), 3);
    assert!(matches!(&frames[1], Frame::Control(c) if c.kind() == ControlKind::Ping));
    let Frame::Data(last) = &frames[2] else {
        panic!("expected the continuation last");
    };
    assert!(!last.header().is_first());
    assert!(last.header().fin());
}

#[test]
fn close_reason_is_truncated_on_a_char_boundary() {
    let reason = "é".repeat(100);
    let frame = ControlFrame::close(CloseCode::PROTOCOL_ERROR, &reason);
    assert!(frame.payload().len() <= 125);
    assert_eq!(frame.close_code(), Some(CloseCode::PROTOCOL_ERROR));
    assert!(std::str::from_utf8(&frame.payload()[2..]).is_ok());
}

#[test]
fn ping_payload_is_capped() {
    let frame = ControlFrame::ping(vec![1_u8; 300]);
    assert_eq!(frame.payload().len(), 125);
    assert_eq!(ControlFrame::pong(frame.into_payload()).payload().len(), 125);
}

#[test]
fn read_buffer_fits_a_control_frame_when_fragments_are_tiny() {
    assert_eq!(codec(Role::Server, 8).buffer_capacity(), 14 + 125);
    assert_eq!(codec(Role::Server, 4096).buffer_capacity(), 14 + 4096);
}

proptest! {
    #[test]
    fn masking_twice_restores_the_payload(payload in proptest::collection::vec(any::<u8>(), 0..256), key in any::<[u8; 4]>()) {
        let mut buf = payload.clone();
        apply_mask(&mut buf, key);
        apply_mask(&mut buf, key);
        prop_assert_eq!(buf, payload);
    }
}
