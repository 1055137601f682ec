//! Persisted key layout of the single KV namespace. Every component reads
//! and writes through these builders so the layout stays in one place.

use once_cell::sync::Lazy;
use regex::Regex;

pub const META_VERSION: &str = "meta:version";
pub const RUNTIME_ACTIVE: &str = "runtime:active";
pub const REGISTRY_INDEX: &str = "adapter_registry:index";
pub const ADMIN_USER: &str = "admin:user:primary";

pub const AUDIT_PREFIX: &str = "audit:proposal:";
pub const VAULT_PREFIX: &str = "vault:secret:";

static BINDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,128}$").expect("binding regex"));

/// Vault binding names are constrained so they can double as environment
/// variable names for the resolver fallback.
pub fn is_valid_binding(name: &str) -> bool {
    BINDING_RE.is_match(name)
}

pub fn vault_secret(binding: &str) -> String {
    format!("{VAULT_PREFIX}{binding}")
}

pub fn proposal(proposal_id: &str) -> String {
    format!("adapter_registry:proposal:{proposal_id}")
}

pub fn manifest_snapshot(adapter_id: &str, revision: u64) -> String {
    format!("adapter_registry:manifest:{adapter_id}:{revision}")
}

/// Audit keys sort lexicographically by `occurred_at`, so a prefix listing
/// yields time order.
pub fn audit_event(occurred_at: &str, event_id: &str) -> String {
    format!("{AUDIT_PREFIX}{occurred_at}:{event_id}")
}

pub fn pairing(code: &str) -> String {
    format!("pairing:{code}")
}

pub fn admin_session(session_id: &str) -> String {
    format!("admin:session:{session_id}")
}

pub fn login_state(username: &str, client_id: &str) -> String {
    format!("admin:login:{username}:{client_id}")
}
