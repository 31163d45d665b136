//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce).
//! Key size: 32 bytes.  Nonce: 12 bytes (random per call).  Tag: 16 bytes.
//!
//! Sealed payload on the wire (two sibling fields of a message record):
//!   ciphertext = base64url(ct || tag)
//!   nonce      = base64url(nonce)
//!
//! Nonces come from the OS RNG on every call. At 96 bits the collision bound
//! stays negligible for the volume a single conversation key will ever see.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    agreement::SharedKey,
    encoding::{b64d, b64e},
    error::CryptoError,
};

pub const NONCE_LEN: usize = 12;

/// Ciphertext and the nonce it was sealed with. Always travel together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub ciphertext: String,
    pub nonce: String,
}

/// Seal `plaintext` under `key` with a freshly generated nonce.
pub fn encrypt(key: &SharedKey, plaintext: &[u8]) -> Result<SealedPayload, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;

    Ok(SealedPayload {
        ciphertext: b64e(&ciphertext),
        nonce: b64e(&nonce),
    })
}

/// Open a sealed payload. Fails closed: either the whole authenticated
/// plaintext comes back or an error does.
pub fn decrypt(
    key: &SharedKey,
    ciphertext: &str,
    nonce: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let nonce_bytes = b64d(nonce)
        .map_err(|e| CryptoError::MalformedPayload(format!("nonce: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::MalformedPayload(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    let ct = b64d(ciphertext)
        .map_err(|e| CryptoError::MalformedPayload(format!("ciphertext: {e}")))?;

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ct.as_ref())
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// `decrypt` for UTF-8 text bodies.
pub fn decrypt_text(
    key: &SharedKey,
    ciphertext: &str,
    nonce: &str,
) -> Result<Zeroizing<String>, CryptoError> {
    let mut bytes = decrypt(key, ciphertext, nonce)?;
    match String::from_utf8(std::mem::take(&mut *bytes)) {
        Ok(text) => Ok(Zeroizing::new(text)),
        Err(e) => {
            e.into_bytes().zeroize();
            Err(CryptoError::MalformedPayload("plaintext is not UTF-8".into()))
        }
    }
}
