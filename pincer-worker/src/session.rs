//! Admin account and cookie sessions: bootstrap, PBKDF2 password auth,
//! CSRF, idle/absolute expiry, periodic rotation, and login lockout.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use ring::pbkdf2;
use serde::{Deserialize, Serialize};

use pincer_core::{crypto, keys, KvStore};

use crate::config::WorkerConfig;
use crate::error::{ApiError, ErrorKind};
use crate::time;

pub const COOKIE_NAME: &str = "pincer_session";
pub const CSRF_HEADER: &str = "x-pincer-csrf";
/// Lockout keys on this single header on purpose; it is coarse, but it
/// cannot be reset by clearing cookies.
pub const CLIENT_ID_HEADER: &str = "cf-connecting-ip";

pub const PBKDF2_ITERATIONS: u32 = 120_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 12;

const ABSOLUTE_TTL_MS: i64 = 8 * 60 * 60 * 1000;
const IDLE_TTL_MS: i64 = 30 * 60 * 1000;
const ROTATE_AFTER_MS: i64 = 15 * 60 * 1000;

pub const LOCK_THRESHOLD: u32 = 5;
const LOCK_BASE_SECONDS: u64 = 30;
const LOCK_CAP_SECONDS: u64 = 15 * 60;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]{3,64}$").expect("username regex"));

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    pub username: String,
    pub password_salt_hex: String,
    pub password_hash_hex: String,
    pub iterations: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub username: String,
    pub csrf_token: String,
    pub created_at_ms: i64,
    pub rotated_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub absolute_expires_at_ms: i64,
    pub idle_expires_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginState {
    pub failed_count: u32,
    pub lock_until_ms: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Expired,
    Rotate,
    Refresh,
}

/// What to do with a live session at `now`: evict it, rotate its id, or
/// just refresh the idle window.
pub fn disposition(record: &SessionRecord, now_ms: i64) -> Disposition {
    if now_ms > record.absolute_expires_at_ms || now_ms > record.idle_expires_at_ms {
        Disposition::Expired
    } else if now_ms - record.rotated_at_ms >= ROTATE_AFTER_MS {
        Disposition::Rotate
    } else {
        Disposition::Refresh
    }
}

/// Exponential lock duration after `failed_count` failures, capped at
/// fifteen minutes.
pub fn lock_seconds(failed_count: u32) -> u64 {
    let exponent = failed_count.saturating_sub(LOCK_THRESHOLD);
    if exponent >= 5 {
        return LOCK_CAP_SECONDS;
    }
    (LOCK_BASE_SECONDS << exponent).min(LOCK_CAP_SECONDS)
}

pub async fn admin_exists(kv: &Arc<dyn KvStore>) -> Result<bool, ApiError> {
    Ok(kv.get(keys::ADMIN_USER).await?.is_some())
}

pub async fn bootstrap(
    kv: &Arc<dyn KvStore>,
    config: &WorkerConfig,
    token: &str,
    username: &str,
    password: &str,
) -> Result<String, ApiError> {
    if admin_exists(kv).await? {
        return Err(ApiError::new(
            ErrorKind::AdminAlreadyInitialized,
            "an admin account already exists",
        ));
    }
    if !crypto::constant_time_eq(token.as_bytes(), config.bootstrap_token.as_bytes()) {
        return Err(ApiError::new(
            ErrorKind::InvalidBootstrapToken,
            "bootstrap token mismatch",
        ));
    }
    let username = username.trim().to_ascii_lowercase();
    if !USERNAME_RE.is_match(&username) {
        return Err(ApiError::new(
            ErrorKind::InvalidUsername,
            "username must match ^[A-Za-z0-9._-]{3,64}$",
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(
            ErrorKind::InvalidPassword,
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }

    let salt = crypto::random_bytes(SALT_LEN);
    let hash = derive_password_hash(password, &salt, PBKDF2_ITERATIONS);
    let now = time::now_iso();
    let user = AdminUser {
        username: username.clone(),
        password_salt_hex: hex::encode(&salt),
        password_hash_hex: hex::encode(hash),
        iterations: PBKDF2_ITERATIONS,
        created_at: now.clone(),
        updated_at: now,
    };
    let serialized =
        serde_json::to_string(&user).map_err(|err| ApiError::internal(err.to_string()))?;
    kv.put(keys::ADMIN_USER, serialized, None).await?;
    Ok(username)
}

pub async fn login(
    kv: &Arc<dyn KvStore>,
    username: &str,
    password: &str,
    client_id: &str,
) -> Result<(SessionRecord, String), ApiError> {
    let username = username.trim().to_ascii_lowercase();
    let state_key = keys::login_state(&username, client_id);
    let now_ms = time::now_ms();

    let mut state: LoginState = match kv.get(&state_key).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        None => LoginState::default(),
    };
    if state.lock_until_ms > now_ms {
        let remaining = ((state.lock_until_ms - now_ms) as u64).div_ceil(1000);
        return Err(ApiError::new(ErrorKind::LoginLocked, "too many failed logins")
            .with_retry_after(remaining));
    }

    if verify_credentials(kv, &username, password).await? {
        kv.delete(&state_key).await?;
        let record = mint_session(&username, now_ms);
        write_session(kv, &record).await?;
        let cookie = session_cookie(
            &record.session_id,
            ((record.absolute_expires_at_ms - now_ms) / 1000) as u64,
        );
        return Ok((record, cookie));
    }

    state.failed_count += 1;
    state.updated_at = time::now_iso();
    if state.failed_count >= LOCK_THRESHOLD {
        let lock = lock_seconds(state.failed_count);
        state.lock_until_ms = now_ms + (lock as i64) * 1000;
        let serialized =
            serde_json::to_string(&state).map_err(|err| ApiError::internal(err.to_string()))?;
        kv.put(&state_key, serialized, Some(Duration::from_secs(24 * 60 * 60)))
            .await?;
        return Err(ApiError::new(ErrorKind::LoginLocked, "too many failed logins")
            .with_retry_after(lock));
    }
    let serialized =
        serde_json::to_string(&state).map_err(|err| ApiError::internal(err.to_string()))?;
    kv.put(&state_key, serialized, Some(Duration::from_secs(24 * 60 * 60)))
        .await?;
    Err(ApiError::new(ErrorKind::InvalidCredentials, "invalid username or password"))
}

async fn verify_credentials(
    kv: &Arc<dyn KvStore>,
    username: &str,
    password: &str,
) -> Result<bool, ApiError> {
    let Some(raw) = kv.get(keys::ADMIN_USER).await? else {
        return Ok(false);
    };
    let user: AdminUser = serde_json::from_str(&raw)
        .map_err(|err| ApiError::internal(format!("admin record unreadable: {err}")))?;
    if user.username != username {
        return Ok(false);
    }
    let Ok(salt) = hex::decode(&user.password_salt_hex) else {
        return Ok(false);
    };
    let Ok(expected) = hex::decode(&user.password_hash_hex) else {
        return Ok(false);
    };
    Ok(verify_password(password, &salt, user.iterations, &expected))
}

/// Validates the session cookie, enforcing CSRF on demand. Returns the
/// live record plus a replacement `Set-Cookie` when the session rotated.
pub async fn enforce(
    kv: &Arc<dyn KvStore>,
    headers: &HeaderMap,
    require_csrf: bool,
) -> Result<(SessionRecord, Option<String>), ApiError> {
    let Some(session_id) = cookie_value(headers) else {
        return Err(ApiError::new(ErrorKind::MissingAdminSession, "no session cookie"));
    };
    let session_key = keys::admin_session(&session_id);
    let Some(raw) = kv.get(&session_key).await? else {
        return Err(ApiError::new(ErrorKind::InvalidAdminSession, "session not found"));
    };
    let Ok(mut record) = serde_json::from_str::<SessionRecord>(&raw) else {
        return Err(ApiError::new(ErrorKind::InvalidAdminSession, "session unreadable"));
    };

    let now_ms = time::now_ms();
    match disposition(&record, now_ms) {
        Disposition::Expired => {
            kv.delete(&session_key).await?;
            return Err(ApiError::new(ErrorKind::ExpiredAdminSession, "session expired"));
        }
        Disposition::Rotate | Disposition::Refresh => {}
    }

    if require_csrf {
        let presented = headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !crypto::constant_time_eq(presented.as_bytes(), record.csrf_token.as_bytes()) {
            return Err(ApiError::new(ErrorKind::InvalidCsrfToken, "csrf token mismatch"));
        }
    }

    if disposition(&record, now_ms) == Disposition::Rotate {
        kv.delete(&session_key).await?;
        record.session_id = crypto::random_hex(24);
        record.csrf_token = crypto::random_hex(24);
        record.rotated_at_ms = now_ms;
        record.last_seen_at_ms = now_ms;
        record.idle_expires_at_ms = now_ms + IDLE_TTL_MS;
        write_session(kv, &record).await?;
        let cookie = session_cookie(
            &record.session_id,
            ((record.absolute_expires_at_ms - now_ms).max(0) / 1000) as u64,
        );
        return Ok((record, Some(cookie)));
    }

    record.last_seen_at_ms = now_ms;
    record.idle_expires_at_ms = now_ms + IDLE_TTL_MS;
    write_session(kv, &record).await?;
    Ok((record, None))
}

pub async fn logout(kv: &Arc<dyn KvStore>, headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(session_id) = cookie_value(headers) {
        kv.delete(&keys::admin_session(&session_id)).await?;
    }
    Ok(expired_cookie())
}

pub fn client_id(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn mint_session(username: &str, now_ms: i64) -> SessionRecord {
    SessionRecord {
        session_id: crypto::random_hex(24),
        username: username.to_string(),
        csrf_token: crypto::random_hex(24),
        created_at_ms: now_ms,
        rotated_at_ms: now_ms,
        last_seen_at_ms: now_ms,
        absolute_expires_at_ms: now_ms + ABSOLUTE_TTL_MS,
        idle_expires_at_ms: now_ms + IDLE_TTL_MS,
    }
}

async fn write_session(kv: &Arc<dyn KvStore>, record: &SessionRecord) -> Result<(), ApiError> {
    let serialized =
        serde_json::to_string(record).map_err(|err| ApiError::internal(err.to_string()))?;
    let ttl_ms = (record.absolute_expires_at_ms - time::now_ms()).max(0) as u64;
    kv.put(
        &keys::admin_session(&record.session_id),
        serialized,
        Some(Duration::from_millis(ttl_ms)),
    )
    .await?;
    Ok(())
}

fn cookie_value(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("cookie")?.to_str().ok()?;
    for part in raw.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(&format!("{COOKIE_NAME}=")) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn session_cookie(session_id: &str, max_age_seconds: u64) -> String {
    format!(
        "{COOKIE_NAME}={session_id}; Max-Age={max_age_seconds}; Path=/; HttpOnly; Secure; SameSite=Lax"
    )
}

pub fn expired_cookie() -> String {
    format!("{COOKIE_NAME}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax")
}

fn derive_password_hash(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::derive(
        PBKDF2_ALG,
        NonZeroU32::new(iterations).expect("iterations > 0"),
        salt,
        password.as_bytes(),
        &mut out,
    );
    out
}

fn verify_password(password: &str, salt: &[u8], iterations: u32, expected: &[u8]) -> bool {
    let Some(iterations) = NonZeroU32::new(iterations) else {
        return false;
    };
    pbkdf2::verify(PBKDF2_ALG, iterations, salt, password.as_bytes(), expected).is_ok()
}
