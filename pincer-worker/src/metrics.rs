//! Isolate-local proxy metrics.
//!
//! Every egress call records one observation on its way out, whatever the
//! outcome. The snapshot is process-local and resets with the process; it
//! exists for the admin surface, not for durable analytics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allowed,
    Denied,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProxyObservation {
    pub adapter: String,
    pub action: String,
    pub outcome: Outcome,
    pub status_class: String,
    pub deny_reason: Option<String>,
    pub latency_ms: u64,
}

#[derive(Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionStats {
    allowed: u64,
    denied: u64,
    error: u64,
    total_latency_ms: u64,
    status_classes: BTreeMap<String, u64>,
    deny_reasons: BTreeMap<String, u64>,
}

#[derive(Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    started_at: Option<String>,
    actions: BTreeMap<String, ActionStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, observation: ProxyObservation) {
        let mut inner = self.inner.lock().expect("metrics mutex");
        if inner.started_at.is_none() {
            inner.started_at = Some(time::now_iso());
        }
        let stats = inner
            .actions
            .entry(format!(
                "{adapter}:{action}",
                adapter = observation.adapter,
                action = observation.action
            ))
            .or_default();
        match observation.outcome {
            Outcome::Allowed => stats.allowed += 1,
            Outcome::Denied => stats.denied += 1,
            Outcome::Error => stats.error += 1,
        }
        stats.total_latency_ms += observation.latency_ms;
        *stats
            .status_classes
            .entry(observation.status_class)
            .or_default() += 1;
        if let Some(reason) = observation.deny_reason {
            *stats.deny_reasons.entry(reason).or_default() += 1;
        }
    }

    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock().expect("metrics mutex");
        serde_json::json!({
            "startedAt": &inner.started_at,
            "actions": &inner.actions,
        })
    }
}
