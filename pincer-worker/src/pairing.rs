//! One-time pairing codes: the admin mints a short-lived code, the agent
//! exchanges it once for its runtime credentials.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pincer_core::{crypto, keys, KvStore};

use crate::auth::load_runtime_record;
use crate::error::{ApiError, ErrorKind};
use crate::state::AppState;

pub const PAIRING_TTL_SECONDS: u64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRecord {
    pub worker_url: String,
    pub runtime_key: String,
    pub hmac_secret: String,
}

/// Mints a fresh code carrying the current runtime credentials.
pub async fn create(state: &AppState) -> Result<(String, u64), ApiError> {
    let record = load_runtime_record(&state.kv).await?.ok_or_else(|| {
        ApiError::new(ErrorKind::MissingRuntimeConfig, "runtime key is not configured")
    })?;

    let key_secret = state.vault.resolve(&record.key_secret_binding).await?;
    if key_secret.is_empty() {
        return Err(ApiError::new(
            ErrorKind::MissingSecret,
            "runtime key secret binding resolved empty",
        ));
    }
    let hmac_secret = state.vault.resolve(&record.hmac_secret_binding).await?;
    if hmac_secret.is_empty() {
        return Err(ApiError::new(
            ErrorKind::MissingHmacSecret,
            "hmac secret binding resolved empty",
        ));
    }

    let pairing = PairingRecord {
        worker_url: state.config.public_url.clone(),
        runtime_key: format!("{id}.{key_secret}", id = record.id),
        hmac_secret,
    };
    let serialized =
        serde_json::to_string(&pairing).map_err(|err| ApiError::internal(err.to_string()))?;

    let code = crypto::pairing_code();
    state
        .kv
        .put(
            &keys::pairing(&code),
            serialized,
            Some(Duration::from_secs(PAIRING_TTL_SECONDS)),
        )
        .await?;
    Ok((code, PAIRING_TTL_SECONDS))
}

/// Consumes a code. The KV offers no atomic read-delete, so the value is
/// read first and the delete is the race-resolving gate: of two callers
/// that both read the record, only the one whose delete removes a live
/// key gets the credentials, and the loser observes absence.
pub async fn consume(kv: &Arc<dyn KvStore>, code: &str) -> Result<PairingRecord, ApiError> {
    let code = code.trim().to_ascii_uppercase();
    let key = keys::pairing(&code);
    let not_found = || {
        ApiError::new(
            ErrorKind::InvalidOrExpiredCode,
            "pairing code is invalid or expired",
        )
    };
    let Some(raw) = kv.get(&key).await? else {
        return Err(not_found());
    };
    if !kv.delete(&key).await? {
        return Err(not_found());
    }
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(record),
        Err(err) => Err(ApiError::new(
            ErrorKind::CorruptPairingRecord,
            format!("pairing record unreadable: {err}"),
        )),
    }
}
