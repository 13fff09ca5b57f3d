//! Fuzz target for `Frame::decode`
//!
//! Arbitrary bytes as a length-prefixed frame. Looking for:
//! - Panics on short or empty input
//! - Overflow when adding the prefix to the announced length
//! - Over-reads past the buffer
//!
//! The decoder must never panic; invalid input returns an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use securechat_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert!(frame.payload.len() <= Frame::MAX_PAYLOAD_SIZE);
        assert!(frame.encoded_len() <= data.len());
    }
});
