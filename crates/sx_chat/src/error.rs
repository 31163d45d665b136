use thiserror::Error;

use sx_crypto::CryptoError;
use sx_store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The device cannot produce a key pair; chat is unusable on it.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Public key for {user_id} in conversation {conversation_id} differs from the local device key")]
    PublicKeyConflict {
        conversation_id: String,
        user_id: String,
    },

    #[error("{user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: String,
        user_id: String,
    },

    #[error("Pending queue for conversation {conversation_id} is full ({capacity} messages)")]
    QueueFull {
        conversation_id: String,
        capacity: usize,
    },

    #[error("Session for conversation {0} is closed")]
    SessionClosed(String),
}

impl ChatError {
    /// Errors that should disable the chat feature instead of failing one action.
    pub fn is_feature_disabling(&self) -> bool {
        matches!(self, ChatError::KeyGeneration(_))
    }
}

impl From<CryptoError> for ChatError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyGeneration(msg) => ChatError::KeyGeneration(msg),
            other => ChatError::Crypto(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_generation_is_the_only_disabling_error() {
        let e: ChatError = CryptoError::KeyGeneration("rng offline".into()).into();
        assert!(matches!(e, ChatError::KeyGeneration(_)));
        assert!(e.is_feature_disabling());

        let e: ChatError = CryptoError::AeadDecrypt.into();
        assert!(!e.is_feature_disabling());
        let e: ChatError = StoreError::WriteRejected("x".into()).into();
        assert!(!e.is_feature_disabling());
    }
}
