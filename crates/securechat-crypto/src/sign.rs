//! RSA PKCS#1 v1.5 signatures over SHA-256.
//!
//! The data is hashed here; callers pass the raw bytes to sign. A receipt
//! therefore signs `SHA256(digest_bytes)` where `digest_bytes` is the 32-byte
//! transcript digest.

use rsa::{
    Pkcs1v15Sign,
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey},
};
pub use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::{error::CryptoError, hash::sha256};

/// Parse an unencrypted PEM private key (`PRIVATE KEY` or `RSA PRIVATE KEY`).
///
/// # Errors
///
/// - `CryptoError::InvalidKey` if neither PKCS#8 nor PKCS#1 parsing succeeds
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse a DER `SubjectPublicKeyInfo` holding an RSA key.
pub fn public_key_from_spki_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Sign `data` with PKCS#1 v1.5 / SHA-256.
pub fn sign(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &sha256(data))
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))
}

/// Verify a PKCS#1 v1.5 / SHA-256 signature over `data`.
///
/// # Errors
///
/// - `CryptoError::InvalidSignature` on any mismatch, including a signature
///   of the wrong length
pub fn verify(key: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &sha256(data), signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Bytes covered by a chat message signature: `u64_be(seqno) ‖ u64_be(ts) ‖
/// ciphertext`.
#[must_use]
pub fn message_signing_input(seqno: u64, ts: u64, ciphertext: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(16 + ciphertext.len());
    input.extend_from_slice(&seqno.to_be_bytes());
    input.extend_from_slice(&ts.to_be_bytes());
    input.extend_from_slice(ciphertext);
    input
}
