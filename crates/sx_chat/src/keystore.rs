//! Device key store.
//!
//! One X25519 pair per device slot, created lazily on first chat use and
//! cached for the life of the process. A row that decodes to nothing
//! usable (bad base64, wrong length, a public half that does not match the
//! secret) is treated as missing and replaced. Replacing a key loses access
//! to history encrypted under the old one, so a vault that cannot be read
//! at all is an error and never a reason to regenerate.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use sx_crypto::DeviceKeyPair;
use sx_store::{KeyPersistence, StoredKeyPair};

use crate::error::Result;

pub struct KeyStore {
    persistence: Arc<dyn KeyPersistence>,
    slot: String,
    cached: Mutex<Option<Arc<DeviceKeyPair>>>,
}

impl KeyStore {
    pub fn new(persistence: Arc<dyn KeyPersistence>, slot: impl Into<String>) -> Self {
        Self {
            persistence,
            slot: slot.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Return this device's key pair, generating and persisting one if needed.
    pub async fn get_or_create_key_pair(&self) -> Result<Arc<DeviceKeyPair>> {
        let mut cached = self.cached.lock().await;
        if let Some(pair) = cached.as_ref() {
            return Ok(Arc::clone(pair));
        }

        let pair = match self.load_existing().await? {
            Some(pair) => pair,
            None => self.generate_and_save().await?,
        };
        let pair = Arc::new(pair);
        *cached = Some(Arc::clone(&pair));
        Ok(pair)
    }

    async fn load_existing(&self) -> Result<Option<DeviceKeyPair>> {
        let Some(stored) = self.persistence.load(&self.slot).await.map_err(|e| {
            warn!(slot = %self.slot, error = %e, "device key vault unreadable");
            e
        })?
        else {
            return Ok(None);
        };

        match DeviceKeyPair::import_secret(&stored.secret_b64) {
            Ok(pair) if pair.public().to_b64() == stored.public_b64 => Ok(Some(pair)),
            Ok(_) => {
                warn!(slot = %self.slot, "stored public key does not match secret; regenerating");
                Ok(None)
            }
            Err(e) => {
                warn!(slot = %self.slot, error = %e, "stored device key corrupt; regenerating");
                Ok(None)
            }
        }
    }

    async fn generate_and_save(&self) -> Result<DeviceKeyPair> {
        let pair = DeviceKeyPair::generate()?;
        let stored = StoredKeyPair {
            secret_b64: pair.export_secret(),
            public_b64: pair.public().to_b64(),
        };
        self.persistence.save(&self.slot, &stored).await?;
        info!(
            slot = %self.slot,
            fingerprint = %pair.public().fingerprint(),
            "generated device key pair"
        );
        Ok(pair)
    }
}
