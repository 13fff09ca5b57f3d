//! Session error types.

use securechat_crypto::CryptoError;
use securechat_proto::ProtocolError;
use thiserror::Error;

use crate::{identity::CertificateError, session::SessionState, transcript::TranscriptError};

/// Fatal session errors.
///
/// Any of these moves the session to `Closed`. Per-message failures in the
/// data plane are not errors; they surface as [`RejectReason`] and the
/// session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Peer certificate failed validation.
    #[error("BAD_CERT: {0}")]
    BadCertificate(#[from] CertificateError),

    /// Message arrived in a state that does not accept it.
    #[error("unexpected {message} in state {state:?}")]
    UnexpectedMessage {
        /// Session state at arrival
        state: SessionState,
        /// Wire discriminator of the offending message
        message: &'static str,
    },

    /// Operation is not valid in the current state.
    #[error("invalid state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        /// Required state
        expected: SessionState,
        /// Current state
        actual: SessionState,
    },

    /// Frame or JSON could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// DH parameters, public values or the credential blob were rejected.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Credential request rejected by the peer or the credential store.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transcript could not be persisted.
    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    /// Peer reported a fatal error.
    #[error("peer error: {0}")]
    Peer(String),

    /// Session was already closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Whether the peer should receive a best-effort `{status:"error"}`
    /// before the connection is closed.
    ///
    /// False when the peer already knows (it sent the error) or when the
    /// failure is local.
    pub fn notify_peer(&self) -> bool {
        matches!(
            self,
            Self::BadCertificate(_) | Self::UnexpectedMessage { .. } | Self::Protocol(_) | Self::Crypto(_)
        )
    }
}

/// Why an inbound chat message was rejected.
///
/// The session survives a rejection. Checks run in declaration order and the
/// first failure wins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Sequence number already seen.
    #[error("REPLAY: Expected seqno {expected}, got {got}")]
    Replay {
        /// Next acceptable sequence number
        expected: u64,
        /// Received sequence number
        got: u64,
    },

    /// Sequence number skips ahead.
    #[error("REPLAY: Expected seqno {expected}, got {got}")]
    OutOfOrder {
        /// Next acceptable sequence number
        expected: u64,
        /// Received sequence number
        got: u64,
    },

    /// Timestamp outside the freshness window.
    #[error("STALE: Message timestamp is too old (skew {skew_ms} ms)")]
    Stale {
        /// Absolute difference between local clock and `ts`
        skew_ms: u64,
    },

    /// Signature missing, malformed or invalid under the peer key.
    #[error("SIG_FAIL: Signature verification failed")]
    SignatureInvalid,

    /// Ciphertext did not decrypt to UTF-8 text under the session key.
    #[error("DECRYPT_FAIL: Message could not be decrypted")]
    Undecryptable,
}

impl RejectReason {
    /// Short code prefixing the wire error message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Replay { .. } | Self::OutOfOrder { .. } => "REPLAY",
            Self::Stale { .. } => "STALE",
            Self::SignatureInvalid => "SIG_FAIL",
            Self::Undecryptable => "DECRYPT_FAIL",
        }
    }
}
