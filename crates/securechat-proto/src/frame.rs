//! Length-prefixed transport frames.
//!
//! A `Frame` is the unit the byte stream carries:
//! - 4-byte big-endian payload length
//! - payload bytes (UTF-8 JSON, or base64 text for the credential blob)
//!
//! This is a pure data holder. Message semantics live in [`crate::message`].

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Complete protocol frame.
///
/// Layout on the wire: `[len: u32 BE] + [payload: len bytes]`
///
/// # Invariants
///
/// - Size Limit: `payload.len()` MUST NOT exceed [`Frame::MAX_PAYLOAD_SIZE`].
///   Violations are rejected by [`Frame::encode`] and by
///   [`Frame::payload_len`] before any payload is buffered.
///
/// # Security
///
/// Provides structural validity only. The payload may be attacker controlled
/// JSON; authentication happens at the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Size of the length prefix in bytes.
    pub const PREFIX_SIZE: usize = 4;

    /// Largest payload accepted in either direction (1 MiB).
    pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

    /// Wrap a payload.
    ///
    /// Does NOT validate the size; oversized frames are rejected by
    /// [`Frame::encode`].
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Number of bytes this frame occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::PREFIX_SIZE + self.payload.len()
    }

    /// Encode frame into buffer.
    ///
    /// Writes: `[len (4 bytes BE)] + [payload]`
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds
    ///   [`Frame::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        // MAX_PAYLOAD_SIZE < u32::MAX, checked above.
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Read the payload length announced by a prefix.
    ///
    /// Returns `Ok(None)` when fewer than [`Frame::PREFIX_SIZE`] bytes are
    /// available. Stream readers use this to reject an oversized frame before
    /// buffering its payload.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the announced length exceeds
    ///   [`Frame::MAX_PAYLOAD_SIZE`]
    pub fn payload_len(bytes: &[u8]) -> Result<Option<usize>> {
        let Some(prefix) = bytes.get(..Self::PREFIX_SIZE) else {
            return Ok(None);
        };

        let mut len = [0u8; 4];
        len.copy_from_slice(prefix);
        let len = u32::from_be_bytes(len) as usize;

        if len > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: len, max: Self::MAX_PAYLOAD_SIZE });
        }

        Ok(Some(len))
    }

    /// Decode a frame from wire format.
    ///
    /// Trailing bytes after the announced payload are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTruncated` if the prefix or payload is
    ///   incomplete
    /// - `ProtocolError::PayloadTooLarge` if the prefix announces more than
    ///   [`Frame::MAX_PAYLOAD_SIZE`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(len) = Self::payload_len(bytes)? else {
            return Err(ProtocolError::FrameTruncated {
                expected: Self::PREFIX_SIZE,
                actual: bytes.len(),
            });
        };

        let Some(payload) = bytes.get(Self::PREFIX_SIZE..Self::PREFIX_SIZE + len) else {
            return Err(ProtocolError::FrameTruncated {
                expected: len,
                actual: bytes.len().saturating_sub(Self::PREFIX_SIZE),
            });
        };

        debug_assert_eq!(payload.len(), len);

        Ok(Self { payload: Bytes::copy_from_slice(payload) })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn frame_round_trip(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
            let frame = Frame::new(payload);
            let mut wire = Vec::new();
            frame.encode(&mut wire).expect("should encode");

            prop_assert_eq!(wire.len(), frame.encoded_len());
            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame, parsed);
        }
    }

    #[test]
    fn prefix_is_big_endian_length() {
        let mut wire = Vec::new();
        Frame::new(&b"hello"[..]).encode(&mut wire).unwrap();

        assert_eq!(&wire[..4], &[0, 0, 0, 5]);
        assert_eq!(&wire[4..], b"hello");
    }

    #[test]
    fn empty_payload() {
        let mut wire = Vec::new();
        Frame::new(Bytes::new()).encode(&mut wire).unwrap();

        assert_eq!(wire, vec![0, 0, 0, 0]);
        assert!(Frame::decode(&wire).unwrap().payload.is_empty());
    }

    #[test]
    fn reject_truncated_prefix() {
        let result = Frame::decode(&[0, 0]);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { expected: 4, actual: 2 })));
    }

    #[test]
    fn reject_truncated_payload() {
        let result = Frame::decode(&[0, 0, 0, 10, b'a', b'b']);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { expected: 10, actual: 2 })));
    }

    #[test]
    fn reject_oversized_prefix() {
        let len = (Frame::MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes();
        let result = Frame::payload_len(&len);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn reject_oversized_encode() {
        let frame = Frame::new(vec![0u8; Frame::MAX_PAYLOAD_SIZE + 1]);
        let mut wire = Vec::new();
        assert!(matches!(frame.encode(&mut wire), Err(ProtocolError::PayloadTooLarge { .. })));
        assert!(wire.is_empty());
    }

    #[test]
    fn trailing_bytes_ignored() {
        let frame = Frame::decode(&[0, 0, 0, 1, b'x', 0xFF, 0xFF]).unwrap();
        assert_eq!(&frame.payload[..], b"x");
    }
}
