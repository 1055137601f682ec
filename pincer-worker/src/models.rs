//! Request payloads for the HTTP surface. Parsing goes through
//! [`parse_json`] so malformed bodies surface as `invalid_payload` rather
//! than a framework default.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, ErrorKind};

pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        ApiError::new(ErrorKind::InvalidPayload, format!("request body: {err}"))
    })
}

/// Like [`parse_json`] but an empty body parses as the default value, for
/// endpoints whose body is entirely optional.
pub fn parse_json_or_default<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    parse_json(body)
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub token: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SecretPutRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ProposalSubmitRequest {
    pub manifest: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    #[serde(default)]
    pub proposal_id: Option<String>,
    #[serde(default)]
    pub manifest: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_body_is_invalid_payload() {
        let err = parse_json::<ConnectRequest>(b"{").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
        let err = parse_json::<ConnectRequest>(b"{}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);
    }

    #[test]
    fn optional_body_defaults_when_empty() {
        let parsed: RejectRequest = parse_json_or_default(b"").unwrap();
        assert!(parsed.reason.is_none());
        let parsed: RejectRequest = parse_json_or_default(br#"{"reason":"nope"}"#).unwrap();
        assert_eq!(parsed.reason.as_deref(), Some("nope"));
    }

    #[test]
    fn apply_request_accepts_either_field() {
        let parsed: ApplyRequest = parse_json(br#"{"proposalId":"pr_1"}"#).unwrap();
        assert_eq!(parsed.proposal_id.as_deref(), Some("pr_1"));
        assert!(parsed.manifest.is_none());
        let parsed: ApplyRequest = parse_json(br#"{"manifest":{"id":"x"}}"#).unwrap();
        assert!(parsed.manifest.is_some());
    }
}
