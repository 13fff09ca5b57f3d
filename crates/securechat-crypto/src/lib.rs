//! SecureChat Cryptographic Adapters
//!
//! Thin, pure wrappers around RustCrypto primitives. Nothing here holds
//! state or touches the OS RNG: callers supply random bytes, which keeps the
//! session layer deterministic under test.
//!
//! # Key Lifecycle
//!
//! ```text
//! random 256-bit exponent ──► EphemeralKeyPair ──┐
//!                                                 ├─► shared secret
//! peer public value ──────────────────────────────┘        │
//!                                                          ▼
//!                                        SHA256(big_endian)[..16] = SharedKey
//!                                                          │
//!                                                          ▼
//!                                                AES-128-ECB / PKCS#7
//! ```
//!
//! Two independent exchanges run per session: the temporary key protects
//! the credential request and is dropped right after, the session key
//! protects chat messages.
//!
//! # Security
//!
//! - ECB leaks equal plaintext blocks. Message integrity and origin come
//!   from RSA signatures over the ciphertext, not from the cipher.
//! - Ephemeral exponents and derived keys are zeroized on drop.
//! - Peer DH parameters and public values are range checked before use.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod dh;
pub mod error;
pub mod hash;
pub mod sign;
pub mod symmetric;

pub use dh::{DhParams, EphemeralKeyPair, PRIVATE_KEY_SIZE, SharedKey};
pub use error::CryptoError;
pub use hash::{sha256, sha256_hex};
pub use num_bigint::BigUint;
pub use sign::{RsaPrivateKey, RsaPublicKey, message_signing_input};
