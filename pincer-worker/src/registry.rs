//! Adapter registry: proposal intake, approval/activation, immutable
//! manifest snapshots, and the audit trail.
//!
//! The index at `adapter_registry:index` is the single source of truth for
//! which `(adapterId, revision)` snapshots are live. The KV namespace has
//! no multi-key atomicity, so mutations write snapshot first, then index,
//! then proposal deletion; a crash between steps never leaves `active`
//! pointing at a missing snapshot. Audit writes come last and are
//! non-fatal once the primary operation has succeeded.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use pincer_core::{
    canonical::stable_stringify, crypto, keys, manifest::validate_manifest, AdapterManifest,
    KvStore,
};

use crate::error::{ApiError, ErrorKind};
use crate::time;
use crate::vault::Vault;

const CACHE_TTL: Duration = Duration::from_secs(10);
const MAX_REASON_CHARS: usize = 500;

pub const AUDIT_DEFAULT_LIMIT: usize = 50;
pub const AUDIT_MAX_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryIndex {
    #[serde(default)]
    pub proposals: Vec<ProposalSummary>,
    #[serde(default)]
    pub active: BTreeMap<String, ActiveEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub proposal_id: String,
    pub adapter_id: String,
    pub revision: u64,
    pub submitted_at: String,
    pub submitted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEntry {
    pub revision: u64,
    pub enabled: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub proposal_id: String,
    pub adapter_id: String,
    pub revision: u64,
    pub submitted_at: String,
    pub submitted_by: String,
    pub manifest: AdapterManifest,
}

impl ProposalRecord {
    fn summary(&self) -> ProposalSummary {
        ProposalSummary {
            proposal_id: self.proposal_id.clone(),
            adapter_id: self.adapter_id.clone(),
            revision: self.revision,
            submitted_at: self.submitted_at.clone(),
            submitted_by: self.submitted_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProposalSubmitted,
    ProposalApproved,
    ProposalRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: AuditEventType,
    pub occurred_at: String,
    pub proposal_id: String,
    pub adapter_id: String,
    pub revision: u64,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub manifest: AdapterManifest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    NewInstall,
    InPlaceUpdate,
    ReEnable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub adapter_id: String,
    pub revision: u64,
    pub mode: ApplyMode,
    pub updated_at: String,
}

/// What `apply` receives: a stored proposal (authoritative, no
/// re-validation of content) or a raw manifest document.
pub enum ApplySource {
    Proposal(String),
    Manifest(Value),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAdapter {
    pub adapter_id: String,
    pub revision: u64,
    pub enabled: bool,
    pub updated_at: String,
    pub action_names: Vec<String>,
}

struct CachedView {
    fetched_at: Instant,
    index: RegistryIndex,
    manifests: HashMap<String, AdapterManifest>,
}

pub struct AdapterRegistry {
    kv: Arc<dyn KvStore>,
    cache: Mutex<Option<Arc<CachedView>>>,
}

impl AdapterRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: Mutex::new(None),
        }
    }

    async fn load_index(&self) -> Result<RegistryIndex, ApiError> {
        match self.kv.get(keys::REGISTRY_INDEX).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| ApiError::internal(format!("registry index unreadable: {err}"))),
            None => Ok(RegistryIndex::default()),
        }
    }

    async fn write_index(&self, index: &RegistryIndex) -> Result<(), ApiError> {
        let serialized =
            serde_json::to_string(index).map_err(|err| ApiError::internal(err.to_string()))?;
        self.kv.put(keys::REGISTRY_INDEX, serialized, None).await?;
        self.invalidate();
        Ok(())
    }

    fn invalidate(&self) {
        *self.cache.lock().expect("registry cache mutex") = None;
    }

    async fn load_snapshot(
        &self,
        adapter_id: &str,
        revision: u64,
    ) -> Result<Option<AdapterManifest>, ApiError> {
        match self.kv.get(&keys::manifest_snapshot(adapter_id, revision)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| ApiError::internal(format!("manifest snapshot unreadable: {err}"))),
            None => Ok(None),
        }
    }

    pub async fn submit_proposal(
        &self,
        raw_manifest: &Value,
        submitted_by: &str,
    ) -> Result<ProposalSummary, ApiError> {
        let manifest = validate_manifest(raw_manifest).map_err(invalid_manifest)?;

        let record = ProposalRecord {
            proposal_id: format!("pr_{}", crypto::random_hex(8)),
            adapter_id: manifest.id.clone(),
            revision: manifest.revision,
            submitted_at: time::now_iso(),
            submitted_by: submitted_by.to_string(),
            manifest,
        };

        let serialized =
            serde_json::to_string(&record).map_err(|err| ApiError::internal(err.to_string()))?;
        self.kv
            .put(&keys::proposal(&record.proposal_id), serialized, None)
            .await?;

        let mut index = self.load_index().await?;
        index.proposals.push(record.summary());
        self.write_index(&index).await?;

        self.write_audit(AuditEvent {
            event_id: format!("ae_{}", crypto::random_hex(8)),
            event_type: AuditEventType::ProposalSubmitted,
            occurred_at: record.submitted_at.clone(),
            proposal_id: record.proposal_id.clone(),
            adapter_id: record.adapter_id.clone(),
            revision: record.revision,
            actor: submitted_by.to_string(),
            reason: None,
            manifest: record.manifest.clone(),
        })
        .await;

        Ok(record.summary())
    }

    pub async fn list_proposals(&self) -> Result<Vec<ProposalSummary>, ApiError> {
        Ok(self.load_index().await?.proposals)
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Result<ProposalRecord, ApiError> {
        let Some(raw) = self.kv.get(&keys::proposal(proposal_id)).await? else {
            return Err(ApiError::new(ErrorKind::ProposalNotFound, "proposal not found"));
        };
        serde_json::from_str(&raw)
            .map_err(|err| ApiError::internal(format!("proposal record unreadable: {err}")))
    }

    pub async fn reject_proposal(
        &self,
        proposal_id: &str,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<(String, String), ApiError> {
        let reason = normalize_reason(reason)?;
        let record = self.get_proposal(proposal_id).await?;

        let mut index = self.load_index().await?;
        index
            .proposals
            .retain(|summary| summary.proposal_id != record.proposal_id);
        self.write_index(&index).await?;
        self.kv.delete(&keys::proposal(proposal_id)).await?;

        let rejected_at = time::now_iso();
        self.write_audit(AuditEvent {
            event_id: format!("ae_{}", crypto::random_hex(8)),
            event_type: AuditEventType::ProposalRejected,
            occurred_at: rejected_at.clone(),
            proposal_id: record.proposal_id.clone(),
            adapter_id: record.adapter_id.clone(),
            revision: record.revision,
            actor: actor.to_string(),
            reason,
            manifest: record.manifest,
        })
        .await;

        Ok((record.proposal_id, rejected_at))
    }

    pub async fn apply(
        &self,
        source: ApplySource,
        actor: &str,
        vault: &Vault,
    ) -> Result<ApplyOutcome, ApiError> {
        let (manifest, from_proposal) = match source {
            ApplySource::Proposal(proposal_id) => {
                let record = self.get_proposal(&proposal_id).await?;
                (record.manifest, Some(record.proposal_id))
            }
            ApplySource::Manifest(raw) => {
                (validate_manifest(&raw).map_err(invalid_manifest)?, None)
            }
        };

        let mut index = self.load_index().await?;
        let mode = match index.active.get(&manifest.id) {
            None => ApplyMode::NewInstall,
            Some(entry) if manifest.revision < entry.revision => {
                return Err(ApiError::new(
                    ErrorKind::RevisionOutdated,
                    "a newer revision is already active",
                )
                .with_details(serde_json::json!({
                    "activeRevision": entry.revision,
                    "proposedRevision": manifest.revision,
                })));
            }
            Some(entry) if manifest.revision == entry.revision => {
                let stored = self
                    .load_snapshot(&manifest.id, entry.revision)
                    .await?
                    .ok_or_else(|| {
                        ApiError::internal("active entry references a missing snapshot")
                    })?;
                let stored_canonical = manifest_canonical(&stored)?;
                let proposed_canonical = manifest_canonical(&manifest)?;
                if stored_canonical != proposed_canonical {
                    return Err(ApiError::new(
                        ErrorKind::RevisionConflict,
                        "a different manifest is already stored at this revision",
                    ));
                }
                if entry.enabled {
                    ApplyMode::InPlaceUpdate
                } else {
                    ApplyMode::ReEnable
                }
            }
            Some(_) => ApplyMode::InPlaceUpdate,
        };

        let mut missing = Vec::new();
        for binding in &manifest.required_secrets {
            if vault.resolve(binding).await?.is_empty() {
                missing.push(binding.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ApiError::new(
                ErrorKind::MissingRequiredSecrets,
                "required secret bindings resolved empty",
            )
            .with_details(serde_json::json!({ "missingSecrets": missing })));
        }

        // Snapshot before index: a dangling `active` entry is never written.
        let serialized =
            serde_json::to_string(&manifest).map_err(|err| ApiError::internal(err.to_string()))?;
        self.kv
            .put(
                &keys::manifest_snapshot(&manifest.id, manifest.revision),
                serialized,
                None,
            )
            .await?;

        let updated_at = time::now_iso();
        index.active.insert(
            manifest.id.clone(),
            ActiveEntry {
                revision: manifest.revision,
                enabled: true,
                updated_at: updated_at.clone(),
            },
        );
        if let Some(proposal_id) = &from_proposal {
            index
                .proposals
                .retain(|summary| &summary.proposal_id != proposal_id);
        }
        self.write_index(&index).await?;

        if let Some(proposal_id) = &from_proposal {
            self.kv.delete(&keys::proposal(proposal_id)).await?;
            self.write_audit(AuditEvent {
                event_id: format!("ae_{}", crypto::random_hex(8)),
                event_type: AuditEventType::ProposalApproved,
                occurred_at: updated_at.clone(),
                proposal_id: proposal_id.clone(),
                adapter_id: manifest.id.clone(),
                revision: manifest.revision,
                actor: actor.to_string(),
                reason: None,
                manifest: manifest.clone(),
            })
            .await;
        }

        Ok(ApplyOutcome {
            adapter_id: manifest.id,
            revision: manifest.revision,
            mode,
            updated_at,
        })
    }

    pub async fn set_enabled(
        &self,
        adapter_id: &str,
        enabled: bool,
    ) -> Result<ActiveEntry, ApiError> {
        let mut index = self.load_index().await?;
        let Some(entry) = index.active.get_mut(adapter_id) else {
            return Err(ApiError::new(ErrorKind::AdapterNotFound, "adapter not found"));
        };
        entry.enabled = enabled;
        entry.updated_at = time::now_iso();
        let updated = entry.clone();
        self.write_index(&index).await?;
        Ok(updated)
    }

    /// Every active adapter with its action names; disabled entries
    /// included so the admin surface can show them.
    pub async fn list_active(&self) -> Result<Vec<ActiveAdapter>, ApiError> {
        let view = self.view().await?;
        let mut out = Vec::with_capacity(view.index.active.len());
        for (adapter_id, entry) in &view.index.active {
            let action_names = view
                .manifests
                .get(adapter_id)
                .map(AdapterManifest::action_names)
                .unwrap_or_default();
            out.push(ActiveAdapter {
                adapter_id: adapter_id.clone(),
                revision: entry.revision,
                enabled: entry.enabled,
                updated_at: entry.updated_at.clone(),
                action_names,
            });
        }
        Ok(out)
    }

    /// Hot-path lookup for the proxy: the manifest and action only when the
    /// adapter is active and enabled.
    pub async fn get_adapter_action(
        &self,
        adapter_id: &str,
        action: &str,
    ) -> Result<Option<(AdapterManifest, pincer_core::ActionSpec)>, ApiError> {
        let view = self.view().await?;
        let Some(entry) = view.index.active.get(adapter_id) else {
            return Ok(None);
        };
        if !entry.enabled {
            return Ok(None);
        }
        let Some(manifest) = view.manifests.get(adapter_id) else {
            return Ok(None);
        };
        Ok(manifest
            .actions
            .get(action)
            .map(|spec| (manifest.clone(), spec.clone())))
    }

    /// Union of `requiredSecrets` across active manifests; used as hints
    /// for the secrets-metadata listing.
    pub async fn required_secret_hints(&self) -> Result<Vec<String>, ApiError> {
        let view = self.view().await?;
        let mut hints = Vec::new();
        for manifest in view.manifests.values() {
            for binding in &manifest.required_secrets {
                if !hints.contains(binding) {
                    hints.push(binding.clone());
                }
            }
        }
        Ok(hints)
    }

    pub async fn list_audit(
        &self,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, ApiError> {
        let mut events = Vec::new();
        for key in self.kv.list(keys::AUDIT_PREFIX).await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<AuditEvent>(&raw) else {
                warn!(%key, "skipping unreadable audit event");
                continue;
            };
            if let Some(since) = since {
                if event.occurred_at.as_str() < since {
                    continue;
                }
            }
            events.push(event);
        }
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        events.truncate(limit);
        Ok(events)
    }

    async fn write_audit(&self, event: AuditEvent) {
        let key = keys::audit_event(&event.occurred_at, &event.event_id);
        let serialized = match serde_json::to_string(&event) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(error = %err, "audit event failed to serialize");
                return;
            }
        };
        // The primary operation already succeeded; a lost audit write is
        // logged, not surfaced.
        if let Err(err) = self.kv.put(&key, serialized, None).await {
            warn!(error = %err, %key, "audit event write failed");
        }
    }

    async fn view(&self) -> Result<Arc<CachedView>, ApiError> {
        if let Some(view) = self.cache.lock().expect("registry cache mutex").as_ref() {
            if view.fetched_at.elapsed() < CACHE_TTL {
                return Ok(view.clone());
            }
        }

        let index = self.load_index().await?;
        let mut manifests = HashMap::with_capacity(index.active.len());
        for (adapter_id, entry) in &index.active {
            match self.load_snapshot(adapter_id, entry.revision).await {
                Ok(Some(manifest)) => {
                    manifests.insert(adapter_id.clone(), manifest);
                }
                Ok(None) => warn!(%adapter_id, "active entry has no snapshot"),
                Err(err) => warn!(%adapter_id, error = %err, "snapshot load failed"),
            }
        }
        let view = Arc::new(CachedView {
            fetched_at: Instant::now(),
            index,
            manifests,
        });
        *self.cache.lock().expect("registry cache mutex") = Some(view.clone());
        Ok(view)
    }
}

fn invalid_manifest(errors: Vec<String>) -> ApiError {
    ApiError::new(ErrorKind::InvalidManifest, "manifest failed validation")
        .with_details(serde_json::json!({ "details": errors }))
}

fn manifest_canonical(manifest: &AdapterManifest) -> Result<String, ApiError> {
    let value =
        serde_json::to_value(manifest).map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(stable_stringify(&value))
}

fn normalize_reason(reason: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_REASON_CHARS {
        return Err(ApiError::new(
            ErrorKind::InvalidReason,
            format!("reason must be at most {MAX_REASON_CHARS} characters"),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pincer_core::MemoryKv;
    use serde_json::json;

    fn seed_manifest(revision: u64) -> Value {
        json!({
            "id": "youtube",
            "revision": revision,
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

    struct Fixture {
        registry: AdapterRegistry,
        vault: Vault,
    }

    async fn fixture() -> Fixture {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let vault = Vault::new(kv.clone(), "kek");
        vault.put("YOUTUBE_API_KEY", "yt-secret", "test").await.unwrap();
        Fixture {
            registry: AdapterRegistry::new(kv),
            vault,
        }
    }

    #[tokio::test]
    async fn submit_lists_and_gets_a_proposal() {
        let fx = fixture().await;
        let summary = fx
            .registry
            .submit_proposal(&seed_manifest(1), "rk_test")
            .await
            .unwrap();
        assert!(summary.proposal_id.starts_with("pr_"));
        assert_eq!(summary.adapter_id, "youtube");

        let listed = fx.registry.list_proposals().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].proposal_id, summary.proposal_id);

        let record = fx.registry.get_proposal(&summary.proposal_id).await.unwrap();
        assert_eq!(record.manifest.id, "youtube");
    }

    #[tokio::test]
    async fn submit_rejects_invalid_manifests_with_details() {
        let fx = fixture().await;
        let err = fx
            .registry
            .submit_proposal(&json!({"id": "bad id"}), "rk_test")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidManifest);
    }

    #[tokio::test]
    async fn approve_activates_and_cleans_up_the_proposal() {
        let fx = fixture().await;
        let summary = fx
            .registry
            .submit_proposal(&seed_manifest(1), "rk_test")
            .await
            .unwrap();

        let outcome = fx
            .registry
            .apply(
                ApplySource::Proposal(summary.proposal_id.clone()),
                "admin",
                &fx.vault,
            )
            .await
            .unwrap();
        assert_eq!(outcome.mode, ApplyMode::NewInstall);
        assert_eq!(outcome.revision, 1);

        assert!(fx.registry.list_proposals().await.unwrap().is_empty());
        let err = fx.registry.get_proposal(&summary.proposal_id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProposalNotFound);

        let active = fx.registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].enabled);
        assert_eq!(active[0].action_names, vec!["list_channel_videos"]);
    }

    #[tokio::test]
    async fn audit_trail_records_submission_and_approval() {
        let fx = fixture().await;
        let summary = fx
            .registry
            .submit_proposal(&seed_manifest(1), "rk_test")
            .await
            .unwrap();
        fx.registry
            .apply(
                ApplySource::Proposal(summary.proposal_id.clone()),
                "admin",
                &fx.vault,
            )
            .await
            .unwrap();

        let events = fx.registry.list_audit(None, AUDIT_DEFAULT_LIMIT).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| event.proposal_id == summary.proposal_id));
        let types: Vec<AuditEventType> = events.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&AuditEventType::ProposalSubmitted));
        assert!(types.contains(&AuditEventType::ProposalApproved));
    }

    #[tokio::test]
    async fn reject_records_reason_and_manifest() {
        let fx = fixture().await;
        let summary = fx
            .registry
            .submit_proposal(&seed_manifest(1), "rk_test")
            .await
            .unwrap();
        let (proposal_id, _) = fx
            .registry
            .reject_proposal(
                &summary.proposal_id,
                Some("malicious scope expansion"),
                "admin",
            )
            .await
            .unwrap();
        assert_eq!(proposal_id, summary.proposal_id);

        assert!(fx.registry.list_proposals().await.unwrap().is_empty());

        let events = fx.registry.list_audit(None, AUDIT_DEFAULT_LIMIT).await.unwrap();
        let rejected = events
            .iter()
            .find(|e| e.event_type == AuditEventType::ProposalRejected)
            .expect("rejection event");
        assert_eq!(rejected.reason.as_deref(), Some("malicious scope expansion"));
        assert_eq!(rejected.manifest.id, "youtube");
    }

    #[tokio::test]
    async fn reason_boundary_is_500_chars() {
        let fx = fixture().await;
        let summary = fx
            .registry
            .submit_proposal(&seed_manifest(1), "rk_test")
            .await
            .unwrap();

        let too_long = "x".repeat(501);
        let err = fx
            .registry
            .reject_proposal(&summary.proposal_id, Some(&too_long), "admin")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidReason);

        let max = "x".repeat(500);
        fx.registry
            .reject_proposal(&summary.proposal_id, Some(&max), "admin")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn apply_is_idempotent_for_identical_content() {
        let fx = fixture().await;
        let first = fx
            .registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();
        assert_eq!(first.mode, ApplyMode::NewInstall);

        let second = fx
            .registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();
        assert_eq!(second.mode, ApplyMode::InPlaceUpdate);

        let active = fx.registry.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].revision, 1);
    }

    #[tokio::test]
    async fn equal_revision_with_different_content_conflicts() {
        let fx = fixture().await;
        fx.registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();

        let mut changed = seed_manifest(1);
        changed["actions"]["list_channel_videos"]["limits"]["ratePerMinute"] = json!(10);
        let err = fx
            .registry
            .apply(ApplySource::Manifest(changed), "admin", &fx.vault)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RevisionConflict);
    }

    #[tokio::test]
    async fn older_revision_is_outdated() {
        let fx = fixture().await;
        fx.registry
            .apply(ApplySource::Manifest(seed_manifest(2)), "admin", &fx.vault)
            .await
            .unwrap();
        let err = fx
            .registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RevisionOutdated);
    }

    #[tokio::test]
    async fn apply_requires_resolvable_secrets() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let vault = Vault::new(kv.clone(), "kek");
        let registry = AdapterRegistry::new(kv);
        let err = registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &vault)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingRequiredSecrets);
    }

    #[tokio::test]
    async fn enable_disable_flips_the_flag_and_gates_lookups() {
        let fx = fixture().await;
        fx.registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();

        assert!(fx
            .registry
            .get_adapter_action("youtube", "list_channel_videos")
            .await
            .unwrap()
            .is_some());

        let entry = fx.registry.set_enabled("youtube", false).await.unwrap();
        assert!(!entry.enabled);
        assert!(fx
            .registry
            .get_adapter_action("youtube", "list_channel_videos")
            .await
            .unwrap()
            .is_none());

        let entry = fx.registry.set_enabled("youtube", true).await.unwrap();
        assert!(entry.enabled);
        assert!(fx
            .registry
            .get_adapter_action("youtube", "list_channel_videos")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn disabled_apply_with_same_content_re_enables() {
        let fx = fixture().await;
        fx.registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();
        fx.registry.set_enabled("youtube", false).await.unwrap();

        let outcome = fx
            .registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();
        assert_eq!(outcome.mode, ApplyMode::ReEnable);
        let active = fx.registry.list_active().await.unwrap();
        assert!(active[0].enabled);
    }

    #[tokio::test]
    async fn enabling_unknown_adapter_is_not_found() {
        let fx = fixture().await;
        let err = fx.registry.set_enabled("ghost", true).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AdapterNotFound);
    }

    #[tokio::test]
    async fn unknown_action_on_enabled_adapter_is_none() {
        let fx = fixture().await;
        fx.registry
            .apply(ApplySource::Manifest(seed_manifest(1)), "admin", &fx.vault)
            .await
            .unwrap();
        assert!(fx
            .registry
            .get_adapter_action("youtube", "delete_everything")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn audit_limit_truncates_newest_first() {
        let fx = fixture().await;
        for revision in 1..=3u64 {
            fx.registry
                .submit_proposal(&seed_manifest(revision), "rk_test")
                .await
                .unwrap();
        }
        let events = fx.registry.list_audit(None, 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].occurred_at >= events[1].occurred_at);
    }

    #[test]
    fn reason_normalization() {
        assert_eq!(normalize_reason(None).unwrap(), None);
        assert_eq!(normalize_reason(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_reason(Some("  why  ")).unwrap(),
            Some("why".to_string())
        );
    }
}
