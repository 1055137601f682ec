//! Signed-request verification for the runtime surface.
//!
//! Agents present `Bearer <keyId>.<keySecret>` plus a timestamped
//! HMAC-SHA256 over the canonical string `METHOD\npath\nts\nbodyHash`.
//! Every hash and HMAC comparison is constant-time.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use pincer_core::{crypto, keys, KvStore};

use crate::config::{DEFAULT_HMAC_BINDING, DEFAULT_KEY_BINDING};
use crate::error::{ApiError, ErrorKind};
use crate::vault::Vault;

pub const TIMESTAMP_HEADER: &str = "x-pincer-timestamp";
pub const BODY_SHA256_HEADER: &str = "x-pincer-body-sha256";
pub const SIGNATURE_HEADER: &str = "x-pincer-signature";

pub const DEFAULT_SKEW_SECONDS: i64 = 60;

/// The single runtime-key record at `runtime:active`. Older records may
/// predate the explicit binding fields, so both fall back to the default
/// binding names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeKeyRecord {
    pub id: String,
    pub key_hash: String,
    #[serde(default = "default_hmac_binding")]
    pub hmac_secret_binding: String,
    #[serde(default = "default_key_binding")]
    pub key_secret_binding: String,
    #[serde(default = "default_skew")]
    pub skew_seconds: i64,
    pub updated_at: String,
}

fn default_hmac_binding() -> String {
    DEFAULT_HMAC_BINDING.to_string()
}

fn default_key_binding() -> String {
    DEFAULT_KEY_BINDING.to_string()
}

fn default_skew() -> i64 {
    DEFAULT_SKEW_SECONDS
}

pub async fn load_runtime_record(
    kv: &Arc<dyn KvStore>,
) -> Result<Option<RuntimeKeyRecord>, ApiError> {
    let Some(raw) = kv.get(keys::RUNTIME_ACTIVE).await? else {
        return Ok(None);
    };
    let record = serde_json::from_str(&raw)
        .map_err(|err| ApiError::internal(format!("runtime record unreadable: {err}")))?;
    Ok(Some(record))
}

/// Verifies a runtime request end to end and returns the authenticated
/// key id. `now_seconds` is passed in so the skew boundary is testable.
pub async fn verify_runtime_request(
    kv: &Arc<dyn KvStore>,
    vault: &Vault,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    now_seconds: i64,
) -> Result<String, ApiError> {
    let (key_id, key_secret) = parse_bearer(headers)?;

    let record = load_runtime_record(kv).await?.ok_or_else(|| {
        ApiError::new(ErrorKind::MissingRuntimeConfig, "runtime key is not configured")
    })?;

    if !crypto::constant_time_eq(key_id.as_bytes(), record.id.as_bytes()) {
        return Err(ApiError::new(ErrorKind::UnknownRuntimeKey, "unknown runtime key"));
    }

    let presented_hash = crypto::sha256_hex(key_secret.as_bytes());
    if !crypto::constant_time_eq(presented_hash.as_bytes(), record.key_hash.as_bytes()) {
        return Err(ApiError::new(ErrorKind::InvalidRuntimeKey, "runtime key mismatch"));
    }

    let hmac_secret = vault.resolve(&record.hmac_secret_binding).await?;
    if hmac_secret.is_empty() {
        return Err(ApiError::new(
            ErrorKind::MissingHmacSecret,
            "hmac secret binding resolved empty",
        ));
    }

    let timestamp = header_str(headers, TIMESTAMP_HEADER)
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| {
            ApiError::new(ErrorKind::InvalidTimestamp, "timestamp header is not an integer")
        })?;
    if (now_seconds - timestamp).abs() > record.skew_seconds {
        return Err(ApiError::new(
            ErrorKind::StaleTimestamp,
            "timestamp outside the accepted window",
        ));
    }

    let body_hash = crypto::sha256_hex(body);
    let presented_body_hash = header_str(headers, BODY_SHA256_HEADER).unwrap_or_default();
    if !crypto::constant_time_eq(body_hash.as_bytes(), presented_body_hash.as_bytes()) {
        return Err(ApiError::new(ErrorKind::InvalidBodyHash, "body hash mismatch"));
    }

    let signing = crypto::signing_string(method, path, timestamp, &body_hash);
    let presented_signature = header_str(headers, SIGNATURE_HEADER).unwrap_or_default();
    if !crypto::verify_hmac_hex(hmac_secret.as_bytes(), signing.as_bytes(), presented_signature) {
        return Err(ApiError::new(ErrorKind::InvalidSignature, "signature mismatch"));
    }

    Ok(record.id)
}

/// Freshly minted runtime credentials from a rotate; secrets are already
/// in the vault and the record at `runtime:active` is rewritten.
pub struct RotatedCredentials {
    pub record: RuntimeKeyRecord,
    pub key_secret: String,
    pub hmac_secret: String,
}

/// Mints a new runtime key and HMAC secret, writes both plaintexts to the
/// vault under the record's bindings, and rewrites the runtime record.
/// Creates the record on first setup when none exists.
pub async fn rotate_runtime_credentials(
    kv: &Arc<dyn KvStore>,
    vault: &Vault,
) -> Result<RotatedCredentials, ApiError> {
    let existing = load_runtime_record(kv).await?;
    let (hmac_binding, key_binding, skew_seconds) = match &existing {
        Some(record) => (
            record.hmac_secret_binding.clone(),
            record.key_secret_binding.clone(),
            record.skew_seconds,
        ),
        None => (
            default_hmac_binding(),
            default_key_binding(),
            DEFAULT_SKEW_SECONDS,
        ),
    };

    let key_secret = crypto::random_hex(32);
    let hmac_secret = crypto::random_hex(32);
    vault.put(&key_binding, &key_secret, "rotate").await?;
    vault.put(&hmac_binding, &hmac_secret, "rotate").await?;

    let record = RuntimeKeyRecord {
        id: format!("rk_{}", crypto::random_hex(6)),
        key_hash: crypto::sha256_hex(key_secret.as_bytes()),
        hmac_secret_binding: hmac_binding,
        key_secret_binding: key_binding,
        skew_seconds,
        updated_at: crate::time::now_iso(),
    };
    let serialized =
        serde_json::to_string(&record).map_err(|err| ApiError::internal(err.to_string()))?;
    kv.put(keys::RUNTIME_ACTIVE, serialized, None).await?;

    Ok(RotatedCredentials {
        record,
        key_secret,
        hmac_secret,
    })
}

fn parse_bearer(headers: &HeaderMap) -> Result<(String, String), ApiError> {
    let malformed =
        || ApiError::new(ErrorKind::InvalidRuntimeKeyFormat, "expected Bearer <keyId>.<keySecret>");

    let raw = header_str(headers, "authorization").ok_or_else(malformed)?;
    let token = raw.strip_prefix("Bearer ").ok_or_else(malformed)?;
    let (key_id, key_secret) = token.split_once('.').ok_or_else(malformed)?;
    if key_id.is_empty() || key_secret.is_empty() {
        return Err(malformed());
    }
    Ok((key_id.to_string(), key_secret.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
