//! Device key management
//!
//! Each *device* owns exactly one static X25519 `DeviceKeyPair`. The secret
//! half never leaves the device; the public half is published into every
//! conversation the device takes part in.
//!
//! Key-loss policy
//! ---------------
//! Messages are sealed with a key derived from (own secret, peer public).
//! If a device's pair is regenerated, everything sealed under the previous
//! pair becomes permanently unreadable on that device. Nothing here tries to
//! hide that; callers surface it.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    encoding::{b64d_32, b64e},
    error::CryptoError,
};

pub const KEY_LEN: usize = 32;

// ── Public key ────────────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        b64e(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        Ok(Self(b64d_32(s.trim())?))
    }

    /// Human-readable fingerprint: BLAKE3 of the key, truncated to 10 bytes,
    /// hex-encoded in groups of 4. Short enough for log lines, long enough to
    /// tell two devices apart when comparing out of band.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..10]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TryFrom<String> for PublicKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_b64(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_b64()
    }
}

/// Serialise a public key into its portable text form.
pub fn export_public_key(key: &PublicKey) -> String {
    key.to_b64()
}

/// Parse the portable text form back into a key.
pub fn import_public_key(raw: &str) -> Result<PublicKey, CryptoError> {
    PublicKey::from_b64(raw)
}

// ── Device keypair ────────────────────────────────────────────────────────────

/// Static key-agreement pair for this device. Drop clears the secret.
#[derive(ZeroizeOnDrop)]
pub struct DeviceKeyPair {
    #[zeroize(skip)]
    public: PublicKey,
    secret_bytes: [u8; KEY_LEN],
}

impl DeviceKeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let pair = Self::from_secret_bytes(&seed);
        seed.zeroize();
        pair
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Device secret must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        let secret = StaticSecret::from(arr);
        arr.zeroize();
        let public = PublicKey(X25519Public::from(&secret).to_bytes());
        Ok(Self {
            public,
            secret_bytes: secret.to_bytes(),
        })
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }

    /// Secret half in text form, for local persistence only.
    pub fn export_secret(&self) -> Zeroizing<String> {
        Zeroizing::new(b64e(&self.secret_bytes))
    }

    pub fn import_secret(raw: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(b64d_32(raw.trim())?);
        Self::from_secret_bytes(&bytes[..])
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public", &self.public.fingerprint())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_export_import() {
        let pair = DeviceKeyPair::generate().unwrap();
        let raw = export_public_key(pair.public());
        assert_eq!(raw.len(), 43);
        assert_eq!(import_public_key(&raw).unwrap(), *pair.public());
    }

    #[test]
    fn import_rejects_wrong_length() {
        let short = b64e(&[7u8; 31]);
        assert!(matches!(
            import_public_key(&short),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(import_public_key("not base64 !!").is_err());
    }

    #[test]
    fn secret_restores_same_public_key() {
        let pair = DeviceKeyPair::generate().unwrap();
        let restored = DeviceKeyPair::import_secret(&pair.export_secret()).unwrap();
        assert_eq!(restored.public(), pair.public());
    }

    #[test]
    fn public_key_serde_uses_text_form() {
        let pair = DeviceKeyPair::generate().unwrap();
        let json = serde_json::to_string(pair.public()).unwrap();
        assert_eq!(json, format!("\"{}\"", pair.public().to_b64()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, pair.public());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let pair = DeviceKeyPair::generate().unwrap();
        let dbg = format!("{pair:?}");
        assert!(!dbg.contains(pair.export_secret().as_str()));
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let key = PublicKey::from_bytes([1u8; 32]);
        let fp = key.fingerprint();
        assert_eq!(fp.split(' ').count(), 5);
        assert!(fp.replace(' ', "").chars().all(|c| c.is_ascii_hexdigit()));
    }
}
