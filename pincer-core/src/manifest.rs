//! Adapter manifest model and validation.
//!
//! A manifest is the declarative description of one upstream API: a base
//! URL, the hosts calls may resolve to, the secret bindings it needs, and a
//! map of actions. Validation walks the raw JSON and collects every
//! violation so submitters see the full list at once; only a fully valid
//! document becomes a typed [`AdapterManifest`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::schema::{parse_input_schema, InputSchema};

static ADAPTER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{1,63}$").expect("adapter id regex"));
static ACTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_!-]{1,63}$").expect("action name regex"));
static SECRET_BINDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]{1,127}$").expect("secret binding regex"));

pub const MAX_BODY_KB_CEILING: u64 = 1024;
pub const TIMEOUT_MS_CEILING: u64 = 120_000;
pub const RATE_PER_MINUTE_CEILING: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterManifest {
    pub id: String,
    pub revision: u64,
    pub base_url: String,
    pub allowed_hosts: Vec<String>,
    pub required_secrets: Vec<String>,
    pub actions: BTreeMap<String, ActionSpec>,
}

impl AdapterManifest {
    pub fn action_names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

impl ActionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMethod::Get => "GET",
            ActionMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    Query,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPlacement {
    Header,
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub method: ActionMethod,
    pub path: String,
    pub request_mode: RequestMode,
    pub auth: ActionAuth,
    pub limits: ActionLimits,
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAuth {
    pub placement: AuthPlacement,
    pub name: String,
    pub secret_binding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLimits {
    pub max_body_kb: u64,
    pub timeout_ms: u64,
    pub rate_per_minute: u64,
}

/// Lowercased `host[:port]` of a URL; the port appears only when explicit
/// and non-default, matching how allow-list entries are written.
pub fn host_port(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// Joins an action path against the manifest base URL. Absolute URLs in
/// `path` replace the base entirely, which is why the resolved host is
/// re-checked against the allow-list.
pub fn resolve_action_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    base.join(path)
}

/// Validates a raw manifest document, returning the typed manifest or the
/// complete list of violations.
pub fn validate_manifest(raw: &Value) -> Result<AdapterManifest, Vec<String>> {
    let mut errors = Vec::new();

    let Some(obj) = raw.as_object() else {
        return Err(vec!["manifest must be a JSON object".to_string()]);
    };

    let id = match obj.get("id").and_then(Value::as_str) {
        Some(id) if ADAPTER_ID_RE.is_match(id) => Some(id.to_string()),
        Some(id) => {
            errors.push(format!("id {id:?} must match ^[a-z0-9][a-z0-9_-]{{1,63}}$"));
            None
        }
        None => {
            errors.push("id is required and must be a string".to_string());
            None
        }
    };

    let revision = match obj.get("revision").and_then(Value::as_u64) {
        Some(revision) if revision >= 1 => Some(revision),
        _ => {
            errors.push("revision must be a positive integer".to_string());
            None
        }
    };

    let base = match obj.get("baseUrl").and_then(Value::as_str) {
        Some(raw_url) => match Url::parse(raw_url) {
            Ok(url) if url.scheme() == "https" && url.host_str().is_some() => Some(url),
            Ok(_) => {
                errors.push("baseUrl must be an absolute HTTPS URL".to_string());
                None
            }
            Err(err) => {
                errors.push(format!("baseUrl is not a valid URL: {err}"));
                None
            }
        },
        None => {
            errors.push("baseUrl is required and must be a string".to_string());
            None
        }
    };

    let allowed_hosts = parse_allowed_hosts(obj.get("allowedHosts"), base.as_ref(), &mut errors);
    let required_secrets = parse_required_secrets(obj.get("requiredSecrets"), &mut errors);

    let mut actions = BTreeMap::new();
    match obj.get("actions").and_then(Value::as_object) {
        Some(raw_actions) if !raw_actions.is_empty() => {
            for (name, raw_action) in raw_actions {
                if !ACTION_NAME_RE.is_match(name) {
                    errors.push(format!(
                        "actions.{name}: action name must match ^[a-z0-9][a-z0-9_!-]{{1,63}}$"
                    ));
                    continue;
                }
                if let Some(action) = parse_action(
                    name,
                    raw_action,
                    base.as_ref(),
                    &allowed_hosts,
                    &required_secrets,
                    &mut errors,
                ) {
                    actions.insert(name.clone(), action);
                }
            }
        }
        _ => errors.push("actions must be a non-empty object".to_string()),
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(AdapterManifest {
        id: id.expect("validated"),
        revision: revision.expect("validated"),
        base_url: base.expect("validated").to_string(),
        allowed_hosts,
        required_secrets,
        actions,
    })
}

fn parse_allowed_hosts(
    raw: Option<&Value>,
    base: Option<&Url>,
    errors: &mut Vec<String>,
) -> Vec<String> {
    let Some(list) = raw.and_then(Value::as_array) else {
        errors.push("allowedHosts must be an array of host[:port] strings".to_string());
        return Vec::new();
    };
    let mut hosts = Vec::with_capacity(list.len());
    for item in list {
        match item.as_str() {
            Some(host) if host.contains('*') => {
                errors.push(format!("allowedHosts entry {host:?} must not use wildcards"));
            }
            Some(host) if host.trim().is_empty() => {
                errors.push("allowedHosts entries must not be empty".to_string());
            }
            Some(host) => {
                let normalized = host.trim().to_ascii_lowercase();
                if !hosts.contains(&normalized) {
                    hosts.push(normalized);
                }
            }
            None => errors.push("allowedHosts must contain only strings".to_string()),
        }
    }
    if hosts.is_empty() {
        errors.push("allowedHosts must not be empty".to_string());
    }
    if let Some(base) = base {
        if let Some(base_host) = host_port(base) {
            if !hosts.is_empty() && !hosts.contains(&base_host) {
                errors.push(format!("allowedHosts must include the baseUrl host {base_host}"));
            }
        }
    }
    hosts
}

fn parse_required_secrets(raw: Option<&Value>, errors: &mut Vec<String>) -> Vec<String> {
    let Some(list) = raw.and_then(Value::as_array) else {
        errors.push("requiredSecrets must be an array of binding names".to_string());
        return Vec::new();
    };
    let mut secrets = Vec::with_capacity(list.len());
    for item in list {
        match item.as_str() {
            Some(name) if SECRET_BINDING_RE.is_match(name) => {
                if !secrets.contains(&name.to_string()) {
                    secrets.push(name.to_string());
                }
            }
            Some(name) => errors.push(format!(
                "requiredSecrets entry {name:?} must match ^[A-Z][A-Z0-9_]{{1,127}}$"
            )),
            None => errors.push("requiredSecrets must contain only strings".to_string()),
        }
    }
    secrets
}

fn parse_action(
    name: &str,
    raw: &Value,
    base: Option<&Url>,
    allowed_hosts: &[String],
    required_secrets: &[String],
    errors: &mut Vec<String>,
) -> Option<ActionSpec> {
    let prefix = format!("actions.{name}");
    let Some(obj) = raw.as_object() else {
        errors.push(format!("{prefix} must be an object"));
        return None;
    };

    let method = match obj.get("method").and_then(Value::as_str) {
        Some("GET") => Some(ActionMethod::Get),
        Some("POST") => Some(ActionMethod::Post),
        _ => {
            errors.push(format!("{prefix}.method must be GET or POST"));
            None
        }
    };

    let path = match obj.get("path").and_then(Value::as_str) {
        Some(path) if !path.is_empty() => {
            if let Some(base) = base {
                match resolve_action_url(base, path) {
                    Ok(resolved) => {
                        if resolved.scheme() != "https" {
                            errors.push(format!("{prefix}.path must resolve to an HTTPS URL"));
                        }
                        match host_port(&resolved) {
                            Some(host) if allowed_hosts.contains(&host) => {}
                            _ => errors.push(format!(
                                "{prefix}.path resolved host not in allowedHosts"
                            )),
                        }
                    }
                    Err(err) => {
                        errors.push(format!("{prefix}.path does not resolve: {err}"));
                    }
                }
            }
            Some(path.to_string())
        }
        _ => {
            errors.push(format!("{prefix}.path is required and must be a string"));
            None
        }
    };

    let request_mode = match obj.get("requestMode").and_then(Value::as_str) {
        Some("query") => Some(RequestMode::Query),
        Some("json") => Some(RequestMode::Json),
        _ => {
            errors.push(format!("{prefix}.requestMode must be query or json"));
            None
        }
    };

    let auth = parse_auth(&prefix, obj.get("auth"), required_secrets, errors);
    let limits = parse_limits(&prefix, obj.get("limits"), errors);
    let input_schema = match obj.get("inputSchema") {
        Some(raw_schema) => parse_input_schema(&format!("{prefix}.inputSchema"), raw_schema, errors),
        None => Some(InputSchema::default()),
    };

    Some(ActionSpec {
        method: method?,
        path: path?,
        request_mode: request_mode?,
        auth: auth?,
        limits: limits?,
        input_schema: input_schema?,
    })
}

fn parse_auth(
    prefix: &str,
    raw: Option<&Value>,
    required_secrets: &[String],
    errors: &mut Vec<String>,
) -> Option<ActionAuth> {
    let Some(obj) = raw.and_then(Value::as_object) else {
        errors.push(format!("{prefix}.auth is required"));
        return None;
    };

    let placement = match obj.get("placement").and_then(Value::as_str) {
        Some("header") => Some(AuthPlacement::Header),
        Some("query") => Some(AuthPlacement::Query),
        _ => {
            errors.push(format!("{prefix}.auth.placement must be header or query"));
            None
        }
    };

    let name = match obj.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => Some(name.to_string()),
        _ => {
            errors.push(format!("{prefix}.auth.name must be a non-empty string"));
            None
        }
    };

    let secret_binding = match obj.get("secretBinding").and_then(Value::as_str) {
        Some(binding) if required_secrets.contains(&binding.to_string()) => {
            Some(binding.to_string())
        }
        Some(binding) => {
            errors.push(format!(
                "{prefix}.auth.secretBinding {binding:?} must appear in requiredSecrets"
            ));
            None
        }
        None => {
            errors.push(format!("{prefix}.auth.secretBinding is required"));
            None
        }
    };

    let auth_prefix = match obj.get("prefix") {
        None => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            errors.push(format!("{prefix}.auth.prefix must be a string"));
            None
        }
    };

    Some(ActionAuth {
        placement: placement?,
        name: name?,
        secret_binding: secret_binding?,
        prefix: auth_prefix,
    })
}

fn parse_limits(prefix: &str, raw: Option<&Value>, errors: &mut Vec<String>) -> Option<ActionLimits> {
    let Some(obj) = raw.and_then(Value::as_object) else {
        errors.push(format!("{prefix}.limits is required"));
        return None;
    };

    let mut bounded = |field: &str, ceiling: u64| -> Option<u64> {
        match obj.get(field).and_then(Value::as_u64) {
            Some(value) if value >= 1 && value <= ceiling => Some(value),
            _ => {
                errors.push(format!(
                    "{prefix}.limits.{field} must be an integer between 1 and {ceiling}"
                ));
                None
            }
        }
    };

    let max_body_kb = bounded("maxBodyKb", MAX_BODY_KB_CEILING);
    let timeout_ms = bounded("timeoutMs", TIMEOUT_MS_CEILING);
    let rate_per_minute = bounded("ratePerMinute", RATE_PER_MINUTE_CEILING);

    Some(ActionLimits {
        max_body_kb: max_body_kb?,
        timeout_ms: timeout_ms?,
        rate_per_minute: rate_per_minute?,
    })
}
