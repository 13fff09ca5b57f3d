//! Cryptographic error types.

use thiserror::Error;

/// Errors from the cryptographic adapters.
///
/// Messages never include key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key has the wrong length for the cipher.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes
        expected: usize,
        /// Supplied length in bytes
        actual: usize,
    },

    /// Ciphertext length or padding is invalid.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Signature did not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// Signing operation failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Private or public key could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// DH group parameters rejected.
    #[error("invalid DH parameters: {0}")]
    InvalidDhParameters(&'static str),

    /// Peer DH public value outside `[2, p-2]`.
    #[error("invalid DH public value")]
    InvalidPublicValue,
}
