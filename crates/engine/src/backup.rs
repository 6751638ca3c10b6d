//! Pre-migration backups.
//!
//! A backup is a JSON document holding every user aggregate and, optionally,
//! a description of the tables involved. The stored payload is checksummed
//! with SHA-256 after encryption, so verification needs no key. Encrypted
//! payloads are `nonce (12 bytes) || AES-256-GCM ciphertext`.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::Utc;
use rand::Rng;
use roleshift_core::error::CoreError;
use roleshift_core::hashing::sha256_hex;
use roleshift_core::types::Timestamp;
use roleshift_core::user::UserAggregate;
use roleshift_db::{BackupRecord, MigrationStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BACKUP_FORMAT_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;

/// Tables covered by a backup and their key columns.
const SCHEMA_TABLES: &[(&str, &[&str])] = &[
    (
        "users",
        &[
            "id",
            "email",
            "name",
            "role",
            "subscription_status",
            "preferences",
            "profile",
            "created_at",
            "last_login_at",
            "version",
        ],
    ),
    ("orders", &["id", "user_id", "amount_cents"]),
    ("donations", &["id", "user_id", "amount_cents"]),
    ("library_items", &["id", "user_id", "book_ref"]),
    ("bookmarks", &["id", "user_id", "story_ref"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackupOptions {
    pub include_schema: bool,
    pub include_data: bool,
    pub encrypt: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_schema: true,
            include_data: true,
            encrypt: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub format_version: u32,
    pub created_at: Timestamp,
    pub schema: Option<Vec<TableSchema>>,
    pub users: Option<Vec<UserAggregate>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReceipt {
    pub backup_id: Uuid,
    pub checksum: String,
    pub backup_size: usize,
    pub user_count: usize,
    pub encrypted: bool,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupVerification {
    pub backup_id: Uuid,
    pub passed: bool,
    pub expected_checksum: String,
    pub actual_checksum: String,
    pub encrypted: bool,
    /// Whether the payload decrypted and parsed. `None` when no key is configured.
    pub readable: Option<bool>,
}

#[derive(Clone)]
pub struct BackupService {
    store: Arc<dyn MigrationStore>,
    key: Option<[u8; 32]>,
}

impl BackupService {
    pub fn new(store: Arc<dyn MigrationStore>, key: Option<[u8; 32]>) -> Self {
        Self { store, key }
    }

    pub async fn create(&self, options: BackupOptions) -> Result<BackupReceipt, CoreError> {
        let users = if options.include_data {
            Some(self.store.list_users().await?)
        } else {
            None
        };
        let user_count = users.as_ref().map_or(0, Vec::len);
        let document = BackupDocument {
            format_version: BACKUP_FORMAT_VERSION,
            created_at: Utc::now(),
            schema: options.include_schema.then(schema_description),
            users,
        };
        let plain = serde_json::to_vec(&document)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize backup: {e}")))?;

        let payload = if options.encrypt {
            let key = self.key.ok_or_else(|| {
                CoreError::Validation("Encrypted backups require BACKUP_ENCRYPTION_KEY to be set".into())
            })?;
            encrypt(&key, &plain)?
        } else {
            plain
        };

        let record = BackupRecord {
            id: Uuid::new_v4(),
            created_at: document.created_at,
            checksum: sha256_hex(&payload),
            encrypted: options.encrypt,
            user_count: user_count as i64,
            payload,
        };
        let receipt = BackupReceipt {
            backup_id: record.id,
            checksum: record.checksum.clone(),
            backup_size: record.payload.len(),
            user_count,
            encrypted: record.encrypted,
            created_at: record.created_at,
        };
        self.store.save_backup(record).await?;

        tracing::info!(
            backup_id = %receipt.backup_id,
            users = user_count,
            bytes = receipt.backup_size,
            encrypted = receipt.encrypted,
            "Pre-migration backup created",
        );
        Ok(receipt)
    }

    pub async fn verify(&self, backup_id: Uuid) -> Result<BackupVerification, CoreError> {
        let record = self
            .store
            .find_backup(backup_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Backup", backup_id))?;

        let actual = sha256_hex(&record.payload);
        let passed = actual == record.checksum;

        let readable = if !passed {
            Some(false)
        } else if record.encrypted {
            self.key
                .map(|key| decrypt(&key, &record.payload).is_ok_and(|plain| parses(&plain)))
        } else {
            Some(parses(&record.payload))
        };

        if !passed {
            tracing::error!(%backup_id, expected = %record.checksum, actual = %actual, "Backup checksum mismatch");
        }
        Ok(BackupVerification {
            backup_id,
            passed,
            expected_checksum: record.checksum,
            actual_checksum: actual,
            encrypted: record.encrypted,
            readable,
        })
    }
}

fn schema_description() -> Vec<TableSchema> {
    SCHEMA_TABLES
        .iter()
        .map(|(table, columns)| TableSchema {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
        .collect()
}

fn parses(plain: &[u8]) -> bool {
    serde_json::from_slice::<BackupDocument>(plain).is_ok()
}

pub(crate) fn encrypt(key: &[u8; 32], plain: &[u8]) -> Result<Vec<u8>, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CoreError::Internal(format!("Invalid backup key: {e}")))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plain)
        .map_err(|e| CoreError::Internal(format!("Backup encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn decrypt(key: &[u8; 32], payload: &[u8]) -> Result<Vec<u8>, CoreError> {
    if payload.len() < NONCE_LEN {
        return Err(CoreError::Validation("Encrypted backup is truncated".into()));
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CoreError::Internal(format!("Invalid backup key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::Validation("Backup could not be decrypted with the configured key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use roleshift_core::roles::Role;
    use roleshift_db::{MemoryStore, NewUser};

    const KEY: [u8; 32] = [7u8; 32];

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_user(NewUser::new("admin@example.com", "Admin", Role::Admin))
            .await
            .unwrap();
        store
            .insert_user(NewUser::new("learner@example.com", "Learner", Role::Learner))
            .await
            .unwrap();
        store
    }

    #[test]
    fn encryption_uses_fresh_nonces_and_decrypts() {
        let a = encrypt(&KEY, b"payload").unwrap();
        let b = encrypt(&KEY, b"payload").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&KEY, &a).unwrap(), b"payload");
        assert!(decrypt(&[8u8; 32], &a).is_err());
    }

    #[tokio::test]
    async fn plain_backup_verifies() {
        let store = seeded_store().await;
        let service = BackupService::new(store, None);

        let receipt = service.create(BackupOptions::default()).await.unwrap();
        assert_eq!(receipt.user_count, 2);
        assert_eq!(receipt.checksum.len(), 64);

        let verification = service.verify(receipt.backup_id).await.unwrap();
        assert!(verification.passed);
        assert_eq!(verification.readable, Some(true));
    }

    #[tokio::test]
    async fn encrypted_backup_requires_a_key() {
        let store = seeded_store().await;
        let options = BackupOptions {
            encrypt: true,
            ..Default::default()
        };

        let without_key = BackupService::new(store.clone(), None);
        assert!(without_key.create(options).await.is_err());

        let with_key = BackupService::new(store, Some(KEY));
        let receipt = with_key.create(options).await.unwrap();
        assert!(receipt.encrypted);
        let verification = with_key.verify(receipt.backup_id).await.unwrap();
        assert!(verification.passed);
        assert_eq!(verification.readable, Some(true));
    }

    #[tokio::test]
    async fn unknown_backup_is_not_found() {
        let service = BackupService::new(seeded_store().await, None);
        assert!(matches!(
            service.verify(Uuid::new_v4()).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
