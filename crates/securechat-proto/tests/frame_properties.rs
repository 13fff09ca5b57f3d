//! Property-based tests for frame and message decoding.
//!
//! The decoders face untrusted bytes, so beyond round trips these check that
//! arbitrary input never panics and that concatenated frames split cleanly.

use proptest::prelude::*;
use securechat_proto::{ChatMessage, Frame, Message, ProtocolError};

fn arbitrary_chat() -> impl Strategy<Value = ChatMessage> {
    (any::<u64>(), any::<u64>(), "[A-Za-z0-9+/]{0,64}", "[A-Za-z0-9+/]{0,64}")
        .prop_map(|(seqno, ts, ct, sig)| ChatMessage { seqno, ts, ct, sig })
}

#[test]
fn prop_frame_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        let _ = Frame::decode(&bytes);
    });
}

#[test]
fn prop_message_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        let _ = Message::decode(&bytes);
    });
}

#[test]
fn prop_chat_message_round_trip() {
    proptest!(|(chat in arbitrary_chat())| {
        let message = Message::Chat(chat);
        let frame = message.to_frame().expect("encode should succeed");

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("frame should encode");

        let decoded = Frame::decode(&wire).expect("frame should decode");
        prop_assert_eq!(Message::decode(&decoded.payload).expect("message should decode"), message);
    });
}

#[test]
fn prop_concatenated_frames_split() {
    proptest!(|(payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8))| {
        let mut wire = Vec::new();
        for payload in &payloads {
            Frame::new(payload.clone()).encode(&mut wire).expect("frame should encode");
        }

        let mut offset = 0;
        for payload in &payloads {
            let frame = Frame::decode(&wire[offset..]).expect("frame should decode");
            prop_assert_eq!(&frame.payload[..], &payload[..]);
            offset += frame.encoded_len();
        }
        prop_assert_eq!(offset, wire.len());
    });
}

#[test]
fn prop_truncation_detected() {
    proptest!(|(payload in prop::collection::vec(any::<u8>(), 1..128), cut in 1usize..128)| {
        let mut wire = Vec::new();
        Frame::new(payload.clone()).encode(&mut wire).expect("frame should encode");

        let cut = cut.min(wire.len() - 1);
        let result = Frame::decode(&wire[..wire.len() - cut]);
        prop_assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })), "truncated frame was accepted");
    });
}
