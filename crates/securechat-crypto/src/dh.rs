//! Finite-field Diffie-Hellman and key derivation.
//!
//! The protocol runs two independent exchanges per session (temporary key,
//! then session key). Each uses a fresh [`EphemeralKeyPair`], which is
//! consumed by [`EphemeralKeyPair::derive_shared_key`] so it cannot be
//! reused.
//!
//! Key derivation: `K = SHA256(big_endian(shared_secret))[..16]`, where the
//! big-endian encoding is minimal (no leading zero bytes).

use num_bigint::BigUint;
use num_traits::One;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{error::CryptoError, hash::sha256, symmetric::KEY_SIZE};

/// Size of the random private exponent in bytes (256 bits).
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Smallest modulus accepted from a peer, in bits.
pub const MIN_MODULUS_BITS: u64 = 2048;

/// Largest modulus accepted from a peer, in bits. Bounds the cost of a
/// single `modpow` on attacker supplied parameters.
pub const MAX_MODULUS_BITS: u64 = 8192;

/// RFC 3526 group 15 (3072-bit MODP) prime.
const MODP_3072_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33",
    "A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864",
    "D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2",
    "08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);

/// DH group parameters `(p, g)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParams {
    /// Prime modulus
    pub p: BigUint,
    /// Generator
    pub g: BigUint,
}

impl DhParams {
    /// RFC 3526 3072-bit MODP group with generator 2.
    #[must_use]
    pub fn modp_3072() -> Self {
        let p = BigUint::parse_bytes(MODP_3072_HEX.as_bytes(), 16).unwrap_or_default();
        debug_assert_eq!(p.bits(), 3072);
        Self { p, g: BigUint::from(2u8) }
    }

    /// Check parameters received from a peer.
    ///
    /// Rejects an even or out-of-range modulus and a generator outside
    /// `[2, p-2]`. Primality is not tested.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let bits = self.p.bits();
        if bits < MIN_MODULUS_BITS {
            return Err(CryptoError::InvalidDhParameters("modulus too small"));
        }
        if bits > MAX_MODULUS_BITS {
            return Err(CryptoError::InvalidDhParameters("modulus too large"));
        }
        if !self.p.bit(0) {
            return Err(CryptoError::InvalidDhParameters("modulus is even"));
        }
        if !self.in_open_range(&self.g) {
            return Err(CryptoError::InvalidDhParameters("generator out of range"));
        }
        Ok(())
    }

    /// Check a peer public value lies in `[2, p-2]`.
    pub fn validate_public(&self, value: &BigUint) -> Result<(), CryptoError> {
        if self.in_open_range(value) { Ok(()) } else { Err(CryptoError::InvalidPublicValue) }
    }

    fn in_open_range(&self, value: &BigUint) -> bool {
        let one = BigUint::one();
        *value > one && *value < &self.p - &one
    }
}

/// Single-use DH key pair.
///
/// # Invariants
///
/// - The private exponent never leaves this struct and is zeroized on drop.
/// - [`EphemeralKeyPair::derive_shared_key`] takes `self` by value, so one
///   key pair produces at most one shared key.
pub struct EphemeralKeyPair {
    params: DhParams,
    private: Zeroizing<[u8; PRIVATE_KEY_SIZE]>,
    public: BigUint,
}

impl EphemeralKeyPair {
    /// Derive a key pair from caller supplied random bytes.
    ///
    /// The top bit of the exponent is forced so every exponent is a full
    /// 256-bit value.
    ///
    /// # Security
    ///
    /// Caller MUST provide cryptographically secure random bytes in
    /// production.
    #[must_use]
    pub fn generate(params: DhParams, mut random: [u8; PRIVATE_KEY_SIZE]) -> Self {
        random[0] |= 0x80;
        let private = Zeroizing::new(random);
        random.zeroize();

        let exponent = BigUint::from_bytes_be(private.as_ref());
        let public = params.g.modpow(&exponent, &params.p);

        Self { params, private, public }
    }

    /// Public value `g^x mod p`.
    #[must_use]
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Group parameters this key pair was generated in.
    #[must_use]
    pub fn params(&self) -> &DhParams {
        &self.params
    }

    /// Compute the shared secret with `peer_public` and derive a 16-byte key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidPublicValue` if `peer_public` is outside
    ///   `[2, p-2]`
    pub fn derive_shared_key(self, peer_public: &BigUint) -> Result<SharedKey, CryptoError> {
        self.params.validate_public(peer_public)?;

        let exponent = BigUint::from_bytes_be(self.private.as_ref());
        let secret = peer_public.modpow(&exponent, &self.params.p);

        Ok(SharedKey::from_secret(&secret))
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair").field("public_bits", &self.public.bits()).finish()
    }
}

/// 16-byte AES key derived from a DH shared secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// `SHA256(big_endian(secret))[..16]`.
    #[must_use]
    pub fn from_secret(secret: &BigUint) -> Self {
        let bytes = Zeroizing::new(secret.to_bytes_be());
        let digest = Zeroizing::new(sha256(&bytes));

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest[..KEY_SIZE]);
        Self(key)
    }

    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modp_group_is_well_formed() {
        let params = DhParams::modp_3072();
        assert_eq!(params.p.bits(), 3072);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn both_sides_derive_same_key() {
        let params = DhParams::modp_3072();
        let alice = EphemeralKeyPair::generate(params.clone(), [1u8; 32]);
        let bob = EphemeralKeyPair::generate(params, [2u8; 32]);

        let alice_public = alice.public().clone();
        let bob_public = bob.public().clone();

        let k1 = alice.derive_shared_key(&bob_public).unwrap();
        let k2 = bob.derive_shared_key(&alice_public).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_private_key_changes_shared_key() {
        let params = DhParams::modp_3072();
        let bob = EphemeralKeyPair::generate(params.clone(), [2u8; 32]);
        let bob_public = bob.public().clone();

        let k1 = EphemeralKeyPair::generate(params.clone(), [1u8; 32])
            .derive_shared_key(&bob_public)
            .unwrap();
        let k2 = EphemeralKeyPair::generate(params, [3u8; 32]).derive_shared_key(&bob_public).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn key_derivation_uses_minimal_big_endian() {
        // 0x01_00 encodes as two bytes, not a padded width.
        let key = SharedKey::from_secret(&BigUint::from(256u32));
        assert_eq!(key.as_bytes()[..], sha256(&[1, 0])[..16]);
    }

    #[test]
    fn degenerate_public_values_rejected() {
        let params = DhParams::modp_3072();
        let p_minus_one = &params.p - BigUint::one();

        for bad in [BigUint::from(0u8), BigUint::one(), p_minus_one.clone(), params.p.clone()] {
            let pair = EphemeralKeyPair::generate(params.clone(), [9u8; 32]);
            assert_eq!(pair.derive_shared_key(&bad).unwrap_err(), CryptoError::InvalidPublicValue);
        }
    }

    #[test]
    fn weak_parameters_rejected() {
        let small = DhParams { p: BigUint::from(23u8), g: BigUint::from(5u8) };
        assert!(small.validate().is_err());

        let mut even = DhParams::modp_3072();
        even.p -= BigUint::one();
        assert_eq!(even.validate(), Err(CryptoError::InvalidDhParameters("modulus is even")));

        let mut bad_g = DhParams::modp_3072();
        bad_g.g = BigUint::one();
        assert_eq!(bad_g.validate(), Err(CryptoError::InvalidDhParameters("generator out of range")));

        let huge = DhParams { p: (BigUint::one() << 9000u32) + BigUint::one(), g: BigUint::from(2u8) };
        assert_eq!(huge.validate(), Err(CryptoError::InvalidDhParameters("modulus too large")));
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = SharedKey::from_bytes([0xAB; 16]);
        assert!(!format!("{key:?}").contains("ab"));
    }
}
