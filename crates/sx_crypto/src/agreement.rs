//! Static key agreement.
//!
//!   DH = X25519(own_secret, peer_public)
//!   K  = HKDF-SHA256(salt = "sx-chat-v1", ikm = DH, info = "sx-chat-message-key")
//!
//! Both inputs are static for the life of a conversation, so K is identical
//! every time either side opens it. There is no forward secrecy: a leaked
//! device secret exposes every conversation that device has taken part in.

use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::PublicKey as X25519Public;
use zeroize::ZeroizeOnDrop;

use crate::{
    error::CryptoError,
    keys::{DeviceKeyPair, PublicKey},
};

const KDF_SALT: &[u8] = b"sx-chat-v1";
const KDF_INFO: &[u8] = b"sx-chat-message-key";

/// 256-bit AEAD key shared by the two participants. Memory only.
#[derive(ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &SharedKey) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for SharedKey {}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Derive the conversation key from our pair and the peer's public key.
///
/// Commutative: `derive(A, B.pub) == derive(B, A.pub)`.
pub fn derive_shared_key(
    mine: &DeviceKeyPair,
    peer: &PublicKey,
) -> Result<SharedKey, CryptoError> {
    let dh = mine
        .static_secret()
        .diffie_hellman(&X25519Public::from(*peer.as_bytes()));
    if !dh.was_contributory() {
        return Err(CryptoError::KeyAgreement(
            "peer public key is a low-order point".into(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), dh.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(KDF_INFO, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SharedKey(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_commutative() {
        for _ in 0..8 {
            let alice = DeviceKeyPair::generate().unwrap();
            let bob = DeviceKeyPair::generate().unwrap();
            let k_ab = derive_shared_key(&alice, bob.public()).unwrap();
            let k_ba = derive_shared_key(&bob, alice.public()).unwrap();
            assert_eq!(k_ab, k_ba, "Alice and Bob must derive the same key");
        }
    }

    #[test]
    fn different_pairs_give_different_keys() {
        let alice = DeviceKeyPair::generate().unwrap();
        let bob = DeviceKeyPair::generate().unwrap();
        let mallory = DeviceKeyPair::generate().unwrap();
        let k_ab = derive_shared_key(&alice, bob.public()).unwrap();
        let k_am = derive_shared_key(&alice, mallory.public()).unwrap();
        assert_ne!(k_ab, k_am);
    }

    #[test]
    fn rejects_low_order_peer_key() {
        let alice = DeviceKeyPair::generate().unwrap();
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            derive_shared_key(&alice, &zero),
            Err(CryptoError::KeyAgreement(_))
        ));
    }

    #[test]
    fn equality_checks_every_byte() {
        let mut last = [7u8; 32];
        last[31] = 8;
        assert!(SharedKey([7u8; 32]).ct_eq(&SharedKey([7u8; 32])));
        assert!(!SharedKey([7u8; 32]).ct_eq(&SharedKey(last)));
        let mut first = [7u8; 32];
        first[0] = 0;
        assert_ne!(SharedKey([7u8; 32]), SharedKey(first));
    }
}
