//! AES-128 in ECB mode with PKCS#7 padding.
//!
//! ECB is what the protocol specifies. Every message is encrypted
//! independently under the session key; integrity comes from the RSA
//! signature over the ciphertext, not from the cipher.

use aes::Aes128;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::Pkcs7};

use crate::error::CryptoError;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

/// AES-128 key size in bytes.
pub const KEY_SIZE: usize = 16;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Encrypt `plaintext` under a 16-byte key.
///
/// Output length is the plaintext length rounded up to the next full block
/// (an empty plaintext yields one block of padding).
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128EcbEnc::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })?;

    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt and unpad.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyLength` if `key` is not 16 bytes
/// - `CryptoError::DecryptionFailed` if the ciphertext is not a whole number
///   of blocks or the padding is invalid (usually a wrong key)
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128EcbDec::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })?;

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptionFailed);
    }

    cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}
