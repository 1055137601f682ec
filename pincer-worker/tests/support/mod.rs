//! Shared harness for boundary integration tests: an in-memory worker with
//! a recording upstream double, plus request-signing and admin-session
//! helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pincer_core::{crypto, keys, KvStore, MemoryKv};
use pincer_worker::config::WorkerConfig;
use pincer_worker::proxy::{UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse};
use pincer_worker::{http, AppState};

pub const BOOTSTRAP_TOKEN: &str = "test-bootstrap-token";
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct-horse-battery";

pub const KEY_ID: &str = "rk_fixture";
pub const KEY_SECRET: &str = "fixture-key-plain";
pub const HMAC_SECRET: &str = "fixture-hmac-shared";
pub const HMAC_BINDING: &str = "PINCER_HMAC_SECRET_ACTIVE";
pub const KEY_BINDING: &str = "PINCER_RUNTIME_KEY_SECRET_ACTIVE";

pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

enum CannedResponse {
    Response {
        status: u16,
        content_type: Option<String>,
        body: String,
    },
    Failure(UpstreamFailure),
}

/// Upstream double: records outbound requests, replays canned responses,
/// and answers `200 {}` once the queue is drained.
#[derive(Default)]
pub struct RecordingUpstream {
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<VecDeque<CannedResponse>>,
}

impl RecordingUpstream {
    pub fn push_json(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(CannedResponse::Response {
                status,
                content_type: Some("application/json".to_string()),
                body: body.to_string(),
            });
    }

    pub fn push_text(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(CannedResponse::Response {
                status,
                content_type: Some("text/plain".to_string()),
                body: body.to_string(),
            });
    }

    pub fn push_timeout(&self) {
        self.responses
            .lock()
            .unwrap()
            .push_back(CannedResponse::Failure(UpstreamFailure::Timeout));
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

#[async_trait]
impl UpstreamClient for RecordingUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamFailure> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.as_str().to_string(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });
        match self.responses.lock().unwrap().pop_front() {
            Some(CannedResponse::Response {
                status,
                content_type,
                body,
            }) => Ok(UpstreamResponse {
                status,
                content_type,
                body,
            }),
            Some(CannedResponse::Failure(failure)) => Err(failure),
            None => Ok(UpstreamResponse {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: "{}".to_string(),
            }),
        }
    }
}

pub struct TestHarness {
    pub app: Router,
    pub state: AppState,
    pub upstream: Arc<RecordingUpstream>,
}

impl TestHarness {
    pub fn new() -> Self {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let upstream = Arc::new(RecordingUpstream::default());
        let config = WorkerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            public_url: "https://worker.test".to_string(),
            bootstrap_token: BOOTSTRAP_TOKEN.to_string(),
            kek: "test-kek".to_string(),
        };
        let state = AppState::new(kv, config, upstream.clone());
        let app = http::router(state.clone());
        Self {
            app,
            state,
            upstream,
        }
    }

    /// Writes the fixture runtime record and its vault secrets.
    pub async fn seed_runtime(&self) {
        self.state
            .vault
            .put(HMAC_BINDING, HMAC_SECRET, "test")
            .await
            .unwrap();
        self.state
            .vault
            .put(KEY_BINDING, KEY_SECRET, "test")
            .await
            .unwrap();
        let record = json!({
            "id": KEY_ID,
            "keyHash": crypto::sha256_hex(KEY_SECRET.as_bytes()),
            "hmacSecretBinding": HMAC_BINDING,
            "keySecretBinding": KEY_BINDING,
            "skewSeconds": 60,
            "updatedAt": "2026-01-01T00:00:00.000Z",
        });
        self.state
            .kv
            .put(keys::RUNTIME_ACTIVE, record.to_string(), None)
            .await
            .unwrap();
    }
}

pub fn seed_manifest() -> Value {
    json!({
        "id": "youtube",
        "revision": 1,
        "baseUrl": "https://youtube.googleapis.com",
        "allowedHosts": ["youtube.googleapis.com"],
        "requiredSecrets": ["YOUTUBE_API_KEY"],
        "actions": {
            "list_channel_videos": {
                "method": "GET",
                "path": "/youtube/v3/search",
                "requestMode": "query",
                "auth": {"placement": "query", "name": "key", "secretBinding": "YOUTUBE_API_KEY"},
                "limits": {"maxBodyKb": 8, "timeoutMs": 10000, "ratePerMinute": 90},
                "inputSchema": {
                    "type": "object",
                    "required": ["channelId"],
                    "additionalProperties": false,
                    "properties": {
                        "channelId": {"type": "string", "minLength": 1, "maxLength": 128},
                        "maxResults": {"type": "integer", "minimum": 1, "maximum": 50}
                    }
                }
            }
        }
    })
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn signed_request(method: &str, path: &str, body: &str) -> Request<Body> {
    signed_request_at(method, path, body, unix_now())
}

/// A runtime request signed with the fixture credentials at an arbitrary
/// timestamp.
pub fn signed_request_at(method: &str, path: &str, body: &str, timestamp: i64) -> Request<Body> {
    let body_hash = crypto::sha256_hex(body.as_bytes());
    let signing = crypto::signing_string(method, path, timestamp, &body_hash);
    let signature = crypto::hmac_sha256_hex(HMAC_SECRET.as_bytes(), signing.as_bytes());

    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {KEY_ID}.{KEY_SECRET}"))
        .header("x-pincer-timestamp", timestamp.to_string())
        .header("x-pincer-body-sha256", body_hash)
        .header("x-pincer-signature", format!("v1={signature}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_request(method: &str, path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn bare_request(method: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

/// Sends a request through the router, returning status, headers, and the
/// parsed JSON body (null when empty).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

#[derive(Clone)]
pub struct AdminSession {
    pub cookie: String,
    pub csrf: String,
}

/// Bootstraps the admin account and opens a session.
pub async fn bootstrap_and_login(harness: &TestHarness) -> AdminSession {
    let (status, _, _) = send(
        &harness.app,
        json_request(
            "POST",
            "/v1/admin/bootstrap",
            &json!({
                "token": BOOTSTRAP_TOKEN,
                "username": ADMIN_USERNAME,
                "password": ADMIN_PASSWORD,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "bootstrap failed");
    login(harness).await
}

pub async fn login(harness: &TestHarness) -> AdminSession {
    let (status, headers, body) = send(
        &harness.app,
        json_request(
            "POST",
            "/v1/admin/session/login",
            &json!({ "username": ADMIN_USERNAME, "password": ADMIN_PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let set_cookie = headers
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .expect("login sets a cookie");
    let cookie = set_cookie.split(';').next().unwrap().to_string();
    let csrf = body["csrfToken"].as_str().unwrap().to_string();
    AdminSession { cookie, csrf }
}

/// An admin request carrying the session cookie and CSRF header.
pub fn admin_request(
    method: &str,
    path: &str,
    session: &AdminSession,
    body: Option<&Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("cookie", session.cookie.as_str())
        .header("x-pincer-csrf", session.csrf.as_str());
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    builder
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap()
}

/// Seeds the vault secret the fixture manifest needs and applies it
/// through the admin surface.
pub async fn install_seed_adapter(harness: &TestHarness, session: &AdminSession) {
    let (status, _, body) = send(
        &harness.app,
        admin_request(
            "PUT",
            "/v1/admin/secrets/YOUTUBE_API_KEY",
            session,
            Some(&json!({ "value": "yt-secret" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "secret put failed: {body}");

    let (status, _, body) = send(
        &harness.app,
        admin_request(
            "POST",
            "/v1/admin/adapters/apply",
            session,
            Some(&json!({ "manifest": seed_manifest() })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "apply failed: {body}");
}
