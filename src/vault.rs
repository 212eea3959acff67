//! Local custody of the user's private key.
//!
//! The vault is bound to one identity. Its slot name is derived from that
//! identity, and a record written for a different identity is refused on
//! load instead of being handed out.
//!
//! Stored keys are base64-wrapped PEM. This keeps the key out of casual
//! view; it is not encryption.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{KeyGenerationError, VaultError};
use crate::keys::{KeyPair, PrivateKey};
use crate::storage::LocalStore;

const SLOT_PREFIX: &str = "private_key";

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    identity: String,
    key: String,
}

#[derive(Clone)]
pub struct KeyVault {
    store: Arc<dyn LocalStore>,
    identity: String,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("identity", &self.identity)
            .finish()
    }
}

impl KeyVault {
    pub fn new(store: Arc<dyn LocalStore>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Slot name for this identity's key
    pub fn slot(&self) -> String {
        let digest = blake3::hash(self.identity.as_bytes());
        format!("{}.{}", SLOT_PREFIX, &hex::encode(digest.as_bytes())[..32])
    }

    /// Generate a fresh key pair. Nothing is persisted.
    pub fn generate_key_pair(&self) -> Result<KeyPair, KeyGenerationError> {
        let pair = KeyPair::generate()?;
        tracing::info!(identity = %self.identity, "generated new key pair");
        Ok(pair)
    }

    /// Store the private key, replacing any key stored for this identity
    pub fn persist_private_key(&self, key: &PrivateKey) -> Result<(), VaultError> {
        let record = KeyRecord {
            identity: self.identity.clone(),
            key: STANDARD.encode(key.to_pem()),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| VaultError::Corrupt(e.to_string()))?;
        self.store.put(&self.slot(), &json)?;
        tracing::debug!(identity = %self.identity, "persisted private key");
        Ok(())
    }

    /// Load the stored private key, `None` if nothing is stored
    pub fn load_private_key(&self) -> Result<Option<PrivateKey>, VaultError> {
        let Some(json) = self.store.get(&self.slot())? else {
            return Ok(None);
        };

        let record: KeyRecord =
            serde_json::from_str(&json).map_err(|e| VaultError::Corrupt(e.to_string()))?;
        if record.identity != self.identity {
            tracing::warn!(
                expected = %self.identity,
                found = %record.identity,
                "refusing key stored for another identity"
            );
            return Err(VaultError::IdentityMismatch {
                expected: self.identity.clone(),
                found: record.identity,
            });
        }

        let pem_bytes = STANDARD
            .decode(record.key.as_bytes())
            .map_err(|e| VaultError::Corrupt(e.to_string()))?;
        let pem_str =
            String::from_utf8(pem_bytes).map_err(|e| VaultError::Corrupt(e.to_string()))?;
        let key = PrivateKey::from_pem(&pem_str).map_err(|e| VaultError::Corrupt(e.to_string()))?;
        Ok(Some(key))
    }

    pub fn load_key_pair(&self) -> Result<Option<KeyPair>, VaultError> {
        Ok(self.load_private_key()?.map(KeyPair::from_private_key))
    }

    /// Erase this identity's key material
    pub fn clear(&self) -> Result<(), VaultError> {
        self.store.remove(&self.slot())?;
        tracing::debug!(identity = %self.identity, "cleared key material");
        Ok(())
    }

    /// Re-persist a key from its backup phrase
    pub fn restore_from_phrase(&self, phrase: &str) -> anyhow::Result<KeyPair> {
        let key = PrivateKey::from_backup_phrase(phrase)?;
        self.persist_private_key(&key)?;
        Ok(KeyPair::from_private_key(key))
    }

    /// Re-persist a key from its PEM backup
    pub fn restore_from_pem(&self, pem: &str) -> anyhow::Result<KeyPair> {
        let key = PrivateKey::from_pem(pem)?;
        self.persist_private_key(&key)?;
        Ok(KeyPair::from_private_key(key))
    }
}
