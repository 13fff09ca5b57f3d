//! Property tests for the symmetric cipher and key agreement.

use proptest::prelude::*;
use securechat_crypto::{DhParams, EphemeralKeyPair, SharedKey, symmetric};

proptest! {
    #[test]
    fn aes_round_trip(key in any::<[u8; 16]>(), plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
        let ct = symmetric::encrypt(&key, &plaintext).unwrap();

        prop_assert_eq!(ct.len() % symmetric::BLOCK_SIZE, 0);
        prop_assert!(ct.len() > plaintext.len());
        prop_assert_eq!(symmetric::decrypt(&key, &ct).unwrap(), plaintext);
    }

    #[test]
    fn derived_key_round_trip(secret in any::<[u8; 16]>(), plaintext in ".{0,64}") {
        let key = SharedKey::from_bytes(secret);
        let ct = symmetric::encrypt(key.as_bytes(), plaintext.as_bytes()).unwrap();
        prop_assert_eq!(symmetric::decrypt(key.as_bytes(), &ct).unwrap(), plaintext.as_bytes());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn dh_agreement(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        let params = DhParams::modp_3072();
        let alice = EphemeralKeyPair::generate(params.clone(), a);
        let bob = EphemeralKeyPair::generate(params, b);

        let alice_public = alice.public().clone();
        let bob_public = bob.public().clone();

        let k1 = alice.derive_shared_key(&bob_public).unwrap();
        let k2 = bob.derive_shared_key(&alice_public).unwrap();
        prop_assert_eq!(k1.as_bytes(), k2.as_bytes());
    }
}
