//! Text-safe encoding for binary material.
//!
//! Conversation documents are text-oriented, so keys, nonces and
//! ciphertexts are stored as URL-safe base64 without padding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::CryptoError;

pub fn b64e(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64d(s: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD.decode(s).map_err(CryptoError::Base64Decode)
}

/// Decode exactly 32 bytes (keys).
pub fn b64d_32(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = b64d(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("expected 32-byte key, got {len}")))
}
