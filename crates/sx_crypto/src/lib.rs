//! sx_crypto: SkillExchange secure chat cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Secrets are opaque newtypes; only public keys and sealed payloads
//!   have a text form.
//!
//! # Module layout
//! - `keys`: X25519 device key pair + portable public key form
//! - `agreement`: static ECDH + HKDF-SHA256 into a 256-bit message key
//! - `cipher`: AES-256-GCM seal/open with a fresh random nonce per call
//! - `encoding`: URL-safe base64 used for every text-safe payload
//! - `error`: unified error type

pub mod agreement;
pub mod cipher;
pub mod encoding;
pub mod error;
pub mod keys;

pub use agreement::{derive_shared_key, SharedKey};
pub use cipher::{decrypt, decrypt_text, encrypt, SealedPayload};
pub use error::CryptoError;
pub use keys::{export_public_key, import_public_key, DeviceKeyPair, PublicKey};
