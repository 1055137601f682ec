//! HTTP router: maps the external surface onto the boundary components and
//! enforces per-route authentication.
//!
//! Unauthenticated routes are exactly: health, connect, bootstrap (status +
//! submit), session login/logout/me. Every other `/v1/admin/*` route runs
//! session enforcement with CSRF on non-idempotent methods; every other
//! runtime route runs signed-request verification.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::auth;
use crate::config::service_version;
use crate::error::{ApiError, ErrorKind};
use crate::models::{
    parse_json, parse_json_or_default, ApplyRequest, AuditQuery, BootstrapRequest, ConnectRequest,
    LoginRequest, ProposalSubmitRequest, RejectRequest, SecretPutRequest,
};
use crate::pairing;
use crate::proxy;
use crate::registry::{ApplySource, AUDIT_DEFAULT_LIMIT, AUDIT_MAX_LIMIT};
use crate::session::{self, SessionRecord};
use crate::state::AppState;
use crate::telemetry;
use crate::time;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/connect", post(connect))
        .route("/v1/adapters/proposals", post(submit_proposal))
        .route("/v1/adapters", get(runtime_list_adapters))
        .route("/v1/adapter/{adapter}/{action}", post(proxy_call))
        .route("/v1/admin/bootstrap", get(bootstrap_status).post(bootstrap_admin))
        .route("/v1/admin/session/login", post(login))
        .route("/v1/admin/session/logout", post(logout))
        .route("/v1/admin/session/me", get(session_me))
        .route("/v1/admin/doctor", get(doctor))
        .route("/v1/admin/metrics", get(metrics_snapshot))
        .route("/v1/admin/secrets", get(list_secrets))
        .route(
            "/v1/admin/secrets/{binding}",
            put(put_secret).delete(delete_secret),
        )
        .route("/v1/admin/runtime/rotate", post(rotate_runtime))
        .route("/v1/admin/pairing/generate", post(generate_pairing))
        .route("/v1/admin/adapters", get(admin_list_adapters))
        .route("/v1/admin/adapters/proposals", get(admin_list_proposals))
        .route("/v1/admin/adapters/proposals/{id}", get(admin_get_proposal))
        .route(
            "/v1/admin/adapters/proposals/{id}/reject",
            post(reject_proposal),
        )
        .route("/v1/admin/adapters/apply", post(apply_adapter))
        .route("/v1/admin/adapters/{id}/enable", post(enable_adapter))
        .route("/v1/admin/adapters/{id}/disable", post(disable_adapter))
        .route("/v1/admin/audit", get(list_audit))
        .layer(middleware::from_fn(telemetry::correlation_layer))
        .layer(middleware::from_fn(telemetry::no_store_layer))
        .with_state(state)
}

// --- shared plumbing ---------------------------------------------------

fn ok_json(value: Value) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

fn attach_cookie(mut response: Response, cookie: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

fn respond(result: Result<Value, ApiError>, rotated_cookie: Option<String>) -> Response {
    let response = match result {
        Ok(value) => ok_json(value),
        Err(err) => err.into_response(),
    };
    match rotated_cookie {
        Some(cookie) => attach_cookie(response, &cookie),
        None => response,
    }
}

/// Session enforcement for admin routes. Session-layer rejections carry an
/// expired cookie so stale browser state is cleared.
async fn admin_guard(
    state: &AppState,
    headers: &HeaderMap,
    require_csrf: bool,
) -> Result<(SessionRecord, Option<String>), Response> {
    match session::enforce(&state.kv, headers, require_csrf).await {
        Ok(pair) => Ok(pair),
        Err(err) => {
            let clear_cookie = matches!(
                err.kind,
                ErrorKind::MissingAdminSession
                    | ErrorKind::InvalidAdminSession
                    | ErrorKind::ExpiredAdminSession
            );
            let response = err.into_response();
            Err(if clear_cookie {
                attach_cookie(response, &session::expired_cookie())
            } else {
                response
            })
        }
    }
}

async fn runtime_guard(
    state: &AppState,
    method: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, ApiError> {
    auth::verify_runtime_request(
        &state.kv,
        &state.vault,
        method,
        uri.path(),
        headers,
        body,
        time::now_unix_seconds(),
    )
    .await
}

// --- unauthenticated ----------------------------------------------------

async fn health(State(state): State<AppState>) -> Response {
    let config_version = match state.config_version().await {
        Ok(version) => version,
        Err(err) => return err.into_response(),
    };
    ok_json(json!({
        "ok": true,
        "service": crate::config::SERVICE_NAME,
        "version": service_version(),
        "configVersion": config_version,
    }))
}

async fn connect(State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let request: ConnectRequest = parse_json(&body)?;
        let record = pairing::consume(&state.kv, &request.code).await?;
        Ok(json!({
            "ok": true,
            "workerUrl": record.worker_url,
            "runtimeKey": record.runtime_key,
            "hmacSecret": record.hmac_secret,
        }))
    }
    .await;
    respond(result, None)
}

async fn bootstrap_status(State(state): State<AppState>) -> Response {
    let result = async {
        let exists = session::admin_exists(&state.kv).await?;
        Ok(json!({ "ok": true, "needsBootstrap": !exists }))
    }
    .await;
    respond(result, None)
}

async fn bootstrap_admin(State(state): State<AppState>, body: Bytes) -> Response {
    let result = async {
        let request: BootstrapRequest = parse_json(&body)?;
        let username = session::bootstrap(
            &state.kv,
            &state.config,
            &request.token,
            &request.username,
            &request.password,
        )
        .await?;
        Ok(json!({ "ok": true, "username": username }))
    }
    .await;
    respond(result, None)
}

async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request: LoginRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };
    let client = session::client_id(&headers);
    match session::login(&state.kv, &request.username, &request.password, &client).await {
        Ok((record, cookie)) => attach_cookie(
            ok_json(json!({
                "ok": true,
                "username": record.username,
                "csrfToken": record.csrf_token,
                "expiresAt": time::iso_from_ms(record.absolute_expires_at_ms),
                "idleExpiresAt": time::iso_from_ms(record.idle_expires_at_ms),
            })),
            &cookie,
        ),
        Err(err) => err.into_response(),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match session::logout(&state.kv, &headers).await {
        Ok(cookie) => attach_cookie(ok_json(json!({ "ok": true })), &cookie),
        Err(err) => err.into_response(),
    }
}

async fn session_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (record, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    respond(
        Ok(json!({
            "ok": true,
            "username": record.username,
            "csrfToken": record.csrf_token,
            "expiresAt": time::iso_from_ms(record.absolute_expires_at_ms),
            "idleExpiresAt": time::iso_from_ms(record.idle_expires_at_ms),
        })),
        rotated,
    )
}

// --- runtime surface ----------------------------------------------------

async fn submit_proposal(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key_id = match runtime_guard(&state, "POST", &uri, &headers, &body).await {
        Ok(key_id) => key_id,
        Err(err) => return err.into_response(),
    };
    let result = async {
        let request: ProposalSubmitRequest = parse_json(&body)?;
        let summary = state
            .registry
            .submit_proposal(&request.manifest, &key_id)
            .await?;
        serde_json::to_value(&summary).map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    match result {
        Ok(proposal) => (
            StatusCode::ACCEPTED,
            Json(json!({ "ok": true, "proposal": proposal })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn runtime_list_adapters(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = runtime_guard(&state, "GET", &uri, &headers, b"").await {
        return err.into_response();
    }
    let result = async {
        let adapters: Vec<Value> = state
            .registry
            .list_active()
            .await?
            .into_iter()
            .filter(|adapter| adapter.enabled)
            .map(|adapter| {
                json!({
                    "adapterId": adapter.adapter_id,
                    "revision": adapter.revision,
                    "actionNames": adapter.action_names,
                })
            })
            .collect();
        Ok(json!({ "ok": true, "adapters": adapters }))
    }
    .await;
    respond(result, None)
}

async fn proxy_call(
    State(state): State<AppState>,
    Path((adapter, action)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy::handle(&state, &adapter, &action, uri.path(), &headers, &body).await
}

// --- admin surface ------------------------------------------------------

async fn doctor(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = run_doctor(&state).await;
    respond(result, rotated)
}

async fn run_doctor(state: &AppState) -> Result<Value, ApiError> {
    let mut checks = Vec::new();
    let mut healthy = true;
    let mut check = |name: &str, ok: bool, detail: Option<String>| {
        healthy &= ok;
        checks.push(json!({ "name": name, "ok": ok, "detail": detail }));
    };

    let kv_ok = state.kv.get(pincer_core::keys::META_VERSION).await.is_ok();
    check("kv", kv_ok, None);

    let record = auth::load_runtime_record(&state.kv).await.ok().flatten();
    check("runtimeKey", record.is_some(), None);

    if let Some(record) = &record {
        let hmac = state.vault.resolve(&record.hmac_secret_binding).await?;
        check(
            "hmacSecret",
            !hmac.is_empty(),
            Some(record.hmac_secret_binding.clone()),
        );
        let key_secret = state.vault.resolve(&record.key_secret_binding).await?;
        check(
            "runtimeKeySecret",
            !key_secret.is_empty(),
            Some(record.key_secret_binding.clone()),
        );
    }

    let admin = session::admin_exists(&state.kv).await?;
    check("adminUser", admin, None);

    let active = state.registry.list_active().await?;
    check("adapters", true, Some(format!("{} active", active.len())));

    Ok(json!({ "ok": healthy, "checks": checks }))
}

async fn metrics_snapshot(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    respond(
        Ok(json!({ "ok": true, "metrics": state.metrics.snapshot() })),
        rotated,
    )
}

async fn list_secrets(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let mut hints = Vec::new();
        if let Some(record) = auth::load_runtime_record(&state.kv).await? {
            hints.push(record.hmac_secret_binding);
            hints.push(record.key_secret_binding);
        }
        for binding in state.registry.required_secret_hints().await? {
            if !hints.contains(&binding) {
                hints.push(binding);
            }
        }
        let secrets = state.vault.list_metadata(&hints).await?;
        serde_json::to_value(&secrets)
            .map(|secrets| json!({ "ok": true, "secrets": secrets }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}

async fn put_secret(
    State(state): State<AppState>,
    Path(binding): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (record, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let request: SecretPutRequest = parse_json(&body)?;
        state
            .vault
            .put(&binding, &request.value, &record.username)
            .await?;
        Ok(json!({ "ok": true, "binding": binding }))
    }
    .await;
    respond(result, rotated)
}

async fn delete_secret(
    State(state): State<AppState>,
    Path(binding): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        state.vault.delete(&binding).await?;
        Ok(json!({ "ok": true, "binding": binding }))
    }
    .await;
    respond(result, rotated)
}

async fn rotate_runtime(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated_cookie) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let rotated = auth::rotate_runtime_credentials(&state.kv, &state.vault).await?;
        state.bump_config_version().await?;
        Ok(json!({
            "ok": true,
            "keyId": rotated.record.id,
            "runtimeKey": format!("{id}.{secret}", id = rotated.record.id, secret = rotated.key_secret),
            "hmacSecret": rotated.hmac_secret,
        }))
    }
    .await;
    respond(result, rotated_cookie)
}

async fn generate_pairing(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let (code, ttl) = pairing::create(&state).await?;
        Ok(json!({ "ok": true, "code": code, "expiresInSeconds": ttl }))
    }
    .await;
    respond(result, rotated)
}

async fn admin_list_adapters(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let adapters = state.registry.list_active().await?;
        serde_json::to_value(&adapters)
            .map(|adapters| json!({ "ok": true, "adapters": adapters }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}

async fn admin_list_proposals(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let proposals = state.registry.list_proposals().await?;
        serde_json::to_value(&proposals)
            .map(|proposals| json!({ "ok": true, "proposals": proposals }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}

async fn admin_get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let record = state.registry.get_proposal(&id).await?;
        serde_json::to_value(&record)
            .map(|proposal| json!({ "ok": true, "proposal": proposal }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}

async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (record, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let request: RejectRequest = parse_json_or_default(&body)?;
        let (proposal_id, rejected_at) = state
            .registry
            .reject_proposal(&id, request.reason.as_deref(), &record.username)
            .await?;
        Ok(json!({
            "ok": true,
            "proposalId": proposal_id,
            "status": "rejected",
            "rejectedAt": rejected_at,
        }))
    }
    .await;
    respond(result, rotated)
}

async fn apply_adapter(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (record, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let request: ApplyRequest = parse_json(&body)?;
        let source = match (request.proposal_id, request.manifest) {
            (Some(proposal_id), None) => ApplySource::Proposal(proposal_id),
            (None, Some(manifest)) => ApplySource::Manifest(manifest),
            _ => {
                return Err(ApiError::new(
                    ErrorKind::InvalidPayload,
                    "exactly one of proposalId or manifest is required",
                ));
            }
        };
        let outcome = state
            .registry
            .apply(source, &record.username, &state.vault)
            .await?;
        state.bump_config_version().await?;
        serde_json::to_value(&outcome)
            .map(|outcome| json!({ "ok": true, "result": outcome }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}

async fn enable_adapter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    set_adapter_enabled(state, id, headers, true).await
}

async fn disable_adapter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    set_adapter_enabled(state, id, headers, false).await
}

async fn set_adapter_enabled(
    state: AppState,
    id: String,
    headers: HeaderMap,
    enabled: bool,
) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, true).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let entry = state.registry.set_enabled(&id, enabled).await?;
        state.bump_config_version().await?;
        Ok(json!({
            "ok": true,
            "adapterId": id,
            "revision": entry.revision,
            "enabled": entry.enabled,
            "updatedAt": entry.updated_at,
        }))
    }
    .await;
    respond(result, rotated)
}

async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
    headers: HeaderMap,
) -> Response {
    let (_, rotated) = match admin_guard(&state, &headers, false).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };
    let result = async {
        let limit = match &query.limit {
            None => AUDIT_DEFAULT_LIMIT,
            Some(raw) => match raw.parse::<usize>() {
                Ok(limit) if (1..=AUDIT_MAX_LIMIT).contains(&limit) => limit,
                _ => {
                    return Err(ApiError::new(
                        ErrorKind::InvalidLimit,
                        format!("limit must be an integer between 1 and {AUDIT_MAX_LIMIT}"),
                    ));
                }
            },
        };
        if let Some(since) = &query.since {
            if chrono::DateTime::parse_from_rfc3339(since).is_err() {
                return Err(ApiError::new(
                    ErrorKind::InvalidSince,
                    "since must be an ISO-8601 timestamp",
                ));
            }
        }
        let events = state.registry.list_audit(query.since.as_deref(), limit).await?;
        serde_json::to_value(&events)
            .map(|events| json!({ "ok": true, "events": events }))
            .map_err(|err| ApiError::internal(err.to_string()))
    }
    .await;
    respond(result, rotated)
}
