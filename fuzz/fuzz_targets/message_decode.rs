//! Fuzz target for JSON message decoding
//!
//! Frame payloads are attacker controlled until the session authenticates
//! them. Looking for:
//! - Panics in the `type`/`status` envelope dispatch
//! - Type confusion between typed messages and status replies
//! - DH integers that parse but fail to re-encode
//!
//! Whatever decodes must survive an encode/decode round trip unchanged.
//! Decrypted credential payloads get the same treatment.

#![no_main]

use libfuzzer_sys::fuzz_target;
use securechat_proto::{AuthRequest, Message};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        let encoded = message.encode().expect("decoded message must re-encode");
        let again = Message::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(message, again);
    }

    if let Ok(request) = AuthRequest::from_json(data) {
        let encoded = request.to_json().expect("decoded request must re-encode");
        let again = AuthRequest::from_json(&encoded).expect("re-encoded request must decode");
        assert_eq!(request.email(), again.email());
    }
});
