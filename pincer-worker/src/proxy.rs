//! The egress proxy: turns an authenticated runtime call into a
//! manifest-constrained upstream request and shapes the response.
//!
//! Every path through the handler, success or failure, records one metric
//! observation. The upstream call is never retried; actions may not be
//! idempotent.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use url::Url;

use pincer_core::manifest::{host_port, resolve_action_url};
use pincer_core::schema::validate_input;
use pincer_core::{ActionMethod, ActionSpec, AdapterManifest, AuthPlacement, RequestMode};

use crate::auth;
use crate::error::{ApiError, ErrorKind};
use crate::metrics::{Outcome, ProxyObservation};
use crate::state::AppState;
use crate::time;

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: ActionMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug)]
pub enum UpstreamFailure {
    Timeout,
    Transport(String),
}

/// Seam for the outbound HTTPS call so tests can substitute a double.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure>;
}

pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        let method = match request.method {
            ActionMethod::Get => reqwest::Method::GET,
            ActionMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self
            .client
            .request(method, request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                UpstreamFailure::Timeout
            } else {
                UpstreamFailure::Transport(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;
        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Full proxy pipeline for `POST /v1/adapter/<adapter>/<action>`.
pub async fn handle(
    state: &AppState,
    adapter: &str,
    action: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let started = Instant::now();
    let result = run(state, adapter, action, path, headers, body).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(data) => {
            state.metrics.record(ProxyObservation {
                adapter: adapter.to_string(),
                action: action.to_string(),
                outcome: Outcome::Allowed,
                status_class: "2xx".to_string(),
                deny_reason: None,
                latency_ms,
            });
            (StatusCode::OK, Json(data)).into_response()
        }
        Err(err) => {
            let status = err.status();
            let outcome = if status.is_server_error() {
                Outcome::Error
            } else {
                Outcome::Denied
            };
            state.metrics.record(ProxyObservation {
                adapter: adapter.to_string(),
                action: action.to_string(),
                outcome,
                status_class: format!("{}xx", status.as_u16() / 100),
                deny_reason: Some(err.kind.as_str().to_string()),
                latency_ms,
            });
            err.into_response()
        }
    }
}

async fn run(
    state: &AppState,
    adapter: &str,
    action: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Value, ApiError> {
    let key_id = auth::verify_runtime_request(
        &state.kv,
        &state.vault,
        "POST",
        path,
        headers,
        body,
        time::now_unix_seconds(),
    )
    .await?;

    let Some((manifest, spec)) = state.registry.get_adapter_action(adapter, action).await? else {
        return Err(ApiError::new(
            ErrorKind::ActionNotAllowed,
            "action is not active and enabled",
        ));
    };

    let input = parse_input_payload(body)?;
    validate_input(&spec.input_schema, &input).map_err(|errors| {
        ApiError::new(ErrorKind::InvalidInput, "input failed schema validation")
            .with_details(serde_json::json!({ "details": errors }))
    })?;

    let max_body = spec.limits.max_body_kb * 1024;
    if body.len() as u64 > max_body {
        return Err(ApiError::new(
            ErrorKind::BodyTooLarge,
            format!("body exceeds {max} bytes", max = max_body),
        ));
    }

    if !state.limiter.check(
        &key_id,
        adapter,
        action,
        spec.limits.rate_per_minute,
        time::now_ms(),
    ) {
        return Err(ApiError::new(
            ErrorKind::RateLimited,
            "per-minute action limit reached",
        ));
    }

    let secret = state.vault.resolve(&spec.auth.secret_binding).await?;
    if secret.is_empty() {
        return Err(ApiError::new(
            ErrorKind::MissingSecret,
            format!(
                "secret binding {binding} resolved empty",
                binding = spec.auth.secret_binding
            ),
        ));
    }

    let request = build_upstream_request(&manifest, &spec, &input, &secret)?;

    let response = state.upstream.send(request).await.map_err(|failure| {
        let message = match failure {
            UpstreamFailure::Timeout => "upstream call timed out".to_string(),
            UpstreamFailure::Transport(detail) => format!("upstream call failed: {detail}"),
        };
        ApiError::new(ErrorKind::UpstreamError, message)
    })?;

    if !(200..300).contains(&response.status) {
        return Err(ApiError::new(
            ErrorKind::UpstreamError,
            format!("upstream returned {status}", status = response.status),
        )
        .with_details(serde_json::json!({ "upstreamStatus": response.status })));
    }

    let is_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("application/json"));
    let data = if is_json {
        serde_json::from_str(&response.body).unwrap_or(Value::String(response.body))
    } else {
        Value::String(response.body)
    };

    Ok(serde_json::json!({
        "ok": true,
        "adapter": adapter,
        "action": action,
        "data": data,
    }))
}

/// The runtime body must be a JSON object carrying an `input` object
/// (which may be empty).
fn parse_input_payload(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    let malformed = || {
        ApiError::new(
            ErrorKind::InvalidInputPayload,
            "body must be a JSON object with an `input` object",
        )
    };
    let parsed: Value = serde_json::from_slice(body).map_err(|_| malformed())?;
    let Value::Object(mut top) = parsed else {
        return Err(malformed());
    };
    match top.remove("input") {
        Some(Value::Object(input)) => Ok(input),
        _ => Err(malformed()),
    }
}

/// Constructs the outbound request from the manifest; the resolved URL is
/// re-checked against the allow-list after every interpolation.
fn build_upstream_request(
    manifest: &AdapterManifest,
    spec: &ActionSpec,
    input: &Map<String, Value>,
    secret: &str,
) -> Result<UpstreamRequest, ApiError> {
    let base = Url::parse(&manifest.base_url)
        .map_err(|err| ApiError::internal(format!("stored baseUrl unreadable: {err}")))?;
    let mut url = resolve_action_url(&base, &spec.path)
        .map_err(|err| ApiError::internal(format!("action path does not resolve: {err}")))?;

    let mut headers = Vec::new();
    let mut body = None;

    match spec.request_mode {
        RequestMode::Query => {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in input {
                if value.is_null() {
                    continue;
                }
                pairs.append_pair(name, &query_value(value));
            }
        }
        RequestMode::Json => {
            headers.push(("content-type".to_string(), "application/json".to_string()));
            body = Some(Value::Object(input.clone()).to_string());
        }
    }

    match spec.auth.placement {
        AuthPlacement::Header => {
            let prefix = spec.auth.prefix.as_deref().unwrap_or_default();
            headers.push((spec.auth.name.clone(), format!("{prefix}{secret}")));
        }
        AuthPlacement::Query => {
            url.query_pairs_mut().append_pair(&spec.auth.name, secret);
        }
    }

    if url.scheme() != "https" {
        return Err(ApiError::new(
            ErrorKind::HostNotAllowed,
            "resolved URL is not HTTPS",
        ));
    }
    match host_port(&url) {
        Some(host) if manifest.allowed_hosts.contains(&host) => {}
        _ => {
            return Err(ApiError::new(
                ErrorKind::HostNotAllowed,
                "resolved host not in allowedHosts",
            ));
        }
    }

    Ok(UpstreamRequest {
        method: spec.method,
        url,
        headers,
        body,
        timeout: Duration::from_millis(spec.limits.timeout_ms),
    })
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
