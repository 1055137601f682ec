//! The boundary's error surface: stable machine-readable kinds, HTTP status
//! mapping, and sanitization of anything that leaves on a 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use pincer_core::KvError;

static SECRET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?i)secret").expect("redaction regex"));

/// Replaces anything matching `/secret/i` before a message leaves the
/// boundary on an infrastructure failure.
pub fn redact(message: &str) -> String {
    SECRET_RE.replace_all(message, "[redacted]").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // input / validation
    InvalidPayload,
    InvalidManifest,
    InvalidInput,
    InvalidInputPayload,
    InvalidReason,
    InvalidLimit,
    InvalidSince,
    InvalidSecretValue,
    InvalidUsername,
    InvalidPassword,
    // auth
    InvalidRuntimeKeyFormat,
    UnknownRuntimeKey,
    InvalidRuntimeKey,
    MissingRuntimeConfig,
    MissingHmacSecret,
    InvalidTimestamp,
    StaleTimestamp,
    InvalidBodyHash,
    InvalidSignature,
    MissingSecret,
    MissingAdminSession,
    InvalidAdminSession,
    ExpiredAdminSession,
    InvalidCsrfToken,
    InvalidBootstrapToken,
    InvalidCredentials,
    LoginLocked,
    AdminAlreadyInitialized,
    // registry
    ProposalNotFound,
    AdapterNotFound,
    RevisionOutdated,
    RevisionConflict,
    MissingRequiredSecrets,
    // proxy / runtime
    ActionNotAllowed,
    BodyTooLarge,
    RateLimited,
    HostNotAllowed,
    UpstreamError,
    // pairing
    InvalidOrExpiredCode,
    // infrastructure
    MissingKvBinding,
    CorruptPairingRecord,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidPayload => "invalid_payload",
            ErrorKind::InvalidManifest => "invalid_manifest",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidInputPayload => "invalid_input_payload",
            ErrorKind::InvalidReason => "invalid_reason",
            ErrorKind::InvalidLimit => "invalid_limit",
            ErrorKind::InvalidSince => "invalid_since",
            ErrorKind::InvalidSecretValue => "invalid_secret_value",
            ErrorKind::InvalidUsername => "invalid_username",
            ErrorKind::InvalidPassword => "invalid_password",
            ErrorKind::InvalidRuntimeKeyFormat => "invalid_runtime_key_format",
            ErrorKind::UnknownRuntimeKey => "unknown_runtime_key",
            ErrorKind::InvalidRuntimeKey => "invalid_runtime_key",
            ErrorKind::MissingRuntimeConfig => "missing_runtime_config",
            ErrorKind::MissingHmacSecret => "missing_hmac_secret",
            ErrorKind::InvalidTimestamp => "invalid_timestamp",
            ErrorKind::StaleTimestamp => "stale_timestamp",
            ErrorKind::InvalidBodyHash => "invalid_body_hash",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::MissingSecret => "missing_secret",
            ErrorKind::MissingAdminSession => "missing_admin_session",
            ErrorKind::InvalidAdminSession => "invalid_admin_session",
            ErrorKind::ExpiredAdminSession => "expired_admin_session",
            ErrorKind::InvalidCsrfToken => "invalid_csrf_token",
            ErrorKind::InvalidBootstrapToken => "invalid_bootstrap_token",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::LoginLocked => "login_locked",
            ErrorKind::AdminAlreadyInitialized => "admin_already_initialized",
            ErrorKind::ProposalNotFound => "proposal_not_found",
            ErrorKind::AdapterNotFound => "adapter_not_found",
            ErrorKind::RevisionOutdated => "revision_outdated",
            ErrorKind::RevisionConflict => "revision_conflict",
            ErrorKind::MissingRequiredSecrets => "missing_required_secrets",
            ErrorKind::ActionNotAllowed => "action_not_allowed",
            ErrorKind::BodyTooLarge => "body_too_large",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::HostNotAllowed => "host_not_allowed",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::InvalidOrExpiredCode => "invalid_or_expired_code",
            ErrorKind::MissingKvBinding => "missing_kv_binding",
            ErrorKind::CorruptPairingRecord => "corrupt_pairing_record",
            ErrorKind::InternalError => "internal_error",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidPayload
            | ErrorKind::InvalidManifest
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidInputPayload
            | ErrorKind::InvalidReason
            | ErrorKind::InvalidLimit
            | ErrorKind::InvalidSince
            | ErrorKind::InvalidSecretValue
            | ErrorKind::InvalidUsername
            | ErrorKind::InvalidPassword
            | ErrorKind::MissingRequiredSecrets => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidRuntimeKeyFormat
            | ErrorKind::UnknownRuntimeKey
            | ErrorKind::InvalidRuntimeKey
            | ErrorKind::InvalidTimestamp
            | ErrorKind::StaleTimestamp
            | ErrorKind::InvalidBodyHash
            | ErrorKind::InvalidSignature
            | ErrorKind::MissingAdminSession
            | ErrorKind::InvalidAdminSession
            | ErrorKind::ExpiredAdminSession
            | ErrorKind::InvalidBootstrapToken
            | ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidCsrfToken
            | ErrorKind::ActionNotAllowed
            | ErrorKind::HostNotAllowed => StatusCode::FORBIDDEN,
            ErrorKind::ProposalNotFound
            | ErrorKind::AdapterNotFound
            | ErrorKind::InvalidOrExpiredCode => StatusCode::NOT_FOUND,
            ErrorKind::RevisionOutdated
            | ErrorKind::RevisionConflict
            | ErrorKind::AdminAlreadyInitialized => StatusCode::CONFLICT,
            ErrorKind::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimited | ErrorKind::LoginLocked => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorKind::MissingRuntimeConfig
            | ErrorKind::MissingHmacSecret
            | ErrorKind::MissingSecret
            | ErrorKind::MissingKvBinding
            | ErrorKind::CorruptPairingRecord
            | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    details: Option<Map<String, Value>>,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// An error whose message is just its kind; for kinds that are
    /// self-explanatory on the wire.
    pub fn bare(kind: ErrorKind) -> Self {
        Self::new(kind, kind.as_str().replace('_', " "))
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Extra top-level fields merged into the response body, e.g.
    /// `details` for invalid manifests or `missingSecrets`.
    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details = Some(map);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Unavailable => ApiError::new(
                ErrorKind::MissingKvBinding,
                "kv namespace binding is unavailable",
            ),
            KvError::Backend(message) => ApiError::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            redact(&self.message)
        } else {
            self.message
        };

        let mut body = Map::new();
        body.insert("ok".to_string(), Value::Bool(false));
        body.insert(
            "error".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        body.insert("message".to_string(), Value::String(message));
        if let Some(details) = self.details {
            for (key, value) in details {
                body.entry(key).or_insert(value);
            }
        }

        let mut response = (status, Json(Value::Object(body))).into_response();
        if let Some(seconds) = self.retry_after {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
