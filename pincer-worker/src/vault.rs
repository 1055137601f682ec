//! Authenticated-encryption secret store.
//!
//! Entries live at `vault:secret:<binding>` sealed with AES-256-GCM under a
//! key derived from the KEK. The resolver falls back to a same-named
//! environment binding, which is how deployments inject secrets without
//! writing them through the admin surface. Plaintexts are only ever handed
//! to the proxy's resolver and the pairing/rotate admin flows; the listing
//! surface reports metadata alone.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use pincer_core::{crypto, keys, KvStore};

use crate::error::{ApiError, ErrorKind};
use crate::time;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretRecord {
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
    pub updated_at: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    pub binding: String,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Clone)]
pub struct Vault {
    kv: Arc<dyn KvStore>,
    kek: Arc<str>,
}

impl Vault {
    pub fn new(kv: Arc<dyn KvStore>, kek: &str) -> Self {
        Self {
            kv,
            kek: Arc::from(kek),
        }
    }

    pub async fn put(
        &self,
        binding: &str,
        plaintext: &str,
        updated_by: &str,
    ) -> Result<(), ApiError> {
        if !keys::is_valid_binding(binding) {
            return Err(ApiError::new(
                ErrorKind::InvalidPayload,
                format!("binding {binding:?} must match ^[A-Za-z0-9_]{{1,128}}$"),
            ));
        }
        if plaintext.is_empty() {
            return Err(ApiError::new(
                ErrorKind::InvalidSecretValue,
                "secret value must not be empty",
            ));
        }
        let sealed = crypto::seal(&self.kek, plaintext.as_bytes())
            .map_err(|err| ApiError::internal(err.to_string()))?;
        let record = VaultSecretRecord {
            key_id: "v1".to_string(),
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
            updated_at: time::now_iso(),
            updated_by: updated_by.to_string(),
        };
        let serialized =
            serde_json::to_string(&record).map_err(|err| ApiError::internal(err.to_string()))?;
        self.kv
            .put(&keys::vault_secret(binding), serialized, None)
            .await?;
        Ok(())
    }

    /// Decrypted plaintext, `None` when no record exists. A record that no
    /// longer decrypts yields an empty string; callers treat empty as
    /// absent rather than failing the whole request.
    pub async fn get(&self, binding: &str) -> Result<Option<String>, ApiError> {
        let Some(raw) = self.kv.get(&keys::vault_secret(binding)).await? else {
            return Ok(None);
        };
        let Ok(record) = serde_json::from_str::<VaultSecretRecord>(&raw) else {
            warn!(binding, "vault record failed to parse");
            return Ok(Some(String::new()));
        };
        match crypto::open(&self.kek, &record.nonce, &record.ciphertext) {
            Ok(plaintext) => Ok(Some(String::from_utf8_lossy(&plaintext).into_owned())),
            Err(_) => {
                warn!(binding, "vault record failed to decrypt");
                Ok(Some(String::new()))
            }
        }
    }

    /// Vault plaintext when non-empty, else the same-named environment
    /// binding, else empty.
    pub async fn resolve(&self, binding: &str) -> Result<String, ApiError> {
        if let Some(plaintext) = self.get(binding).await? {
            if !plaintext.is_empty() {
                return Ok(plaintext);
            }
        }
        Ok(env_binding(binding).unwrap_or_default())
    }

    pub async fn delete(&self, binding: &str) -> Result<(), ApiError> {
        self.kv.delete(&keys::vault_secret(binding)).await?;
        Ok(())
    }

    /// Presence metadata for the union of `hints` and every stored binding.
    /// Never returns plaintext.
    pub async fn list_metadata(&self, hints: &[String]) -> Result<Vec<SecretMetadata>, ApiError> {
        let mut bindings: Vec<String> = hints.to_vec();
        for key in self.kv.list(keys::VAULT_PREFIX).await? {
            let binding = key
                .strip_prefix(keys::VAULT_PREFIX)
                .unwrap_or(&key)
                .to_string();
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
        bindings.sort();

        let mut out = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let record = match self.kv.get(&keys::vault_secret(&binding)).await? {
                Some(raw) => serde_json::from_str::<VaultSecretRecord>(&raw).ok(),
                None => None,
            };
            let present = record.is_some() || env_binding(&binding).is_some();
            out.push(SecretMetadata {
                updated_at: record.map(|record| record.updated_at),
                binding,
                present,
            });
        }
        Ok(out)
    }
}

fn env_binding(binding: &str) -> Option<String> {
    std::env::var(binding).ok().filter(|value| !value.is_empty())
}
