//! Local persistence for the device key pair.
//!
//! The secret never leaves the device, so this is deliberately separate
//! from `ChatStore`. Production uses a small SQLite database; tests use the
//! in-memory vault.
//!
//! Rows are stored as text exactly as handed in. Validating them (and
//! regenerating on corruption) is the key store's job, not this layer's.

use std::{
    collections::HashMap,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Persisted form of a device key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredKeyPair {
    pub secret_b64: Zeroizing<String>,
    pub public_b64: String,
}

impl std::fmt::Debug for StoredKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKeyPair")
            .field("public_b64", &self.public_b64)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyPersistence: Send + Sync {
    async fn load(&self, slot: &str) -> Result<Option<StoredKeyPair>, StoreError>;
    async fn save(&self, slot: &str, pair: &StoredKeyPair) -> Result<(), StoreError>;
}

// ── SQLite ───────────────────────────────────────────────────────────────────

/// SQLite-backed key vault. Cheap to clone (pool is Arc internally).
#[derive(Clone)]
pub struct SqliteKeyVault {
    pool: SqlitePool,
}

impl SqliteKeyVault {
    /// Open (or create) the database at `db_path` and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyPersistence for SqliteKeyVault {
    async fn load(&self, slot: &str) -> Result<Option<StoredKeyPair>, StoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT secret_b64, public_b64 FROM device_keys WHERE slot = ? LIMIT 1",
        )
        .bind(slot)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(secret, public)| StoredKeyPair {
            secret_b64: Zeroizing::new(secret),
            public_b64: public,
        }))
    }

    async fn save(&self, slot: &str, pair: &StoredKeyPair) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO device_keys (slot, secret_b64, public_b64, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(slot) DO UPDATE SET secret_b64 = excluded.secret_b64, \
             public_b64 = excluded.public_b64, created_at = excluded.created_at",
        )
        .bind(slot)
        .bind(pair.secret_b64.as_str())
        .bind(&pair.public_b64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKeyVault {
    slots: Mutex<HashMap<String, StoredKeyPair>>,
    failing: AtomicBool,
    failing_reads: AtomicBool,
}

impl MemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load and save fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make loads fail with `Unavailable` while saves keep working.
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("key vault switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyPersistence for MemoryKeyVault {
    async fn load(&self, slot: &str) -> Result<Option<StoredKeyPair>, StoreError> {
        self.check()?;
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("key vault reads switched off".into()));
        }
        Ok(self.slots.lock().get(slot).cloned())
    }

    async fn save(&self, slot: &str, pair: &StoredKeyPair) -> Result<(), StoreError> {
        self.check()?;
        self.slots.lock().insert(slot.to_string(), pair.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(secret: &str, public: &str) -> StoredKeyPair {
        StoredKeyPair {
            secret_b64: Zeroizing::new(secret.to_string()),
            public_b64: public.to_string(),
        }
    }

    #[tokio::test]
    async fn sqlite_vault_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("device-keys.db");

        let vault = SqliteKeyVault::open(&db_path).await.expect("open vault");
        assert!(vault.load("primary").await.unwrap().is_none());
        vault.save("primary", &pair("SECRET", "PUBLIC")).await.unwrap();
        vault.close().await;

        let reopened = SqliteKeyVault::open(&db_path).await.expect("reopen vault");
        let loaded = reopened.load("primary").await.unwrap().expect("row");
        assert_eq!(loaded, pair("SECRET", "PUBLIC"));
    }

    #[tokio::test]
    async fn sqlite_vault_overwrites_slot_and_keeps_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = SqliteKeyVault::open(&dir.path().join("k.db")).await.unwrap();
        vault.save("alice", &pair("A1", "a1")).await.unwrap();
        vault.save("bob", &pair("B1", "b1")).await.unwrap();
        vault.save("alice", &pair("A2", "a2")).await.unwrap();
        assert_eq!(vault.load("alice").await.unwrap(), Some(pair("A2", "a2")));
        assert_eq!(vault.load("bob").await.unwrap(), Some(pair("B1", "b1")));
    }

    #[tokio::test]
    async fn memory_vault_round_trip() {
        let vault = MemoryKeyVault::new();
        vault.save("primary", &pair("S", "P")).await.unwrap();
        assert_eq!(vault.load("primary").await.unwrap(), Some(pair("S", "P")));
        assert!(vault.load("other").await.unwrap().is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let dbg = format!("{:?}", pair("TOPSECRET", "PUB"));
        assert!(!dbg.contains("TOPSECRET"));
    }
}
