//! Fuzz target for length prefix boundary conditions
//!
//! # Strategy
//!
//! - Announced length: zero, small, at max, just over, way over, `u32::MAX`
//! - Payload actually present: none, short, exact, with trailing bytes
//!
//! # Invariants
//!
//! - An announced length over `MAX_PAYLOAD_SIZE` MUST return
//!   `PayloadTooLarge`, whatever follows the prefix
//! - A payload shorter than announced MUST return `FrameTruncated`
//! - A successful decode re-encodes to exactly the consumed bytes

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use securechat_proto::{Frame, ProtocolError};

const MAX: u32 = Frame::MAX_PAYLOAD_SIZE as u32;

#[derive(Debug, Arbitrary)]
enum Announced {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Arbitrary)]
struct Input {
    announced: Announced,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let announced = match input.announced {
        Announced::Zero => 0,
        Announced::Small(n) => u32::from(n),
        Announced::AtMax => MAX,
        Announced::JustOverMax => MAX + 1,
        Announced::WayOverMax => MAX.saturating_mul(16),
        Announced::MaxU32 => u32::MAX,
        Announced::Random(n) => n,
    };

    let mut wire = announced.to_be_bytes().to_vec();
    wire.extend_from_slice(&input.body);

    match Frame::decode(&wire) {
        Ok(frame) => {
            assert_eq!(frame.payload.len(), announced as usize);
            let mut encoded = BytesMut::new();
            frame.encode(&mut encoded).expect("decoded frame must re-encode");
            assert_eq!(&encoded[..], &wire[..frame.encoded_len()]);
        },
        Err(ProtocolError::PayloadTooLarge { .. }) => assert!(announced > MAX),
        Err(ProtocolError::FrameTruncated { .. }) => {
            assert!(announced <= MAX);
            assert!(input.body.len() < announced as usize);
        },
        Err(e) => panic!("unexpected error: {e}"),
    }
});
