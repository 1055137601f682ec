//! Shared per-process state threaded through the router.

use std::sync::Arc;

use pincer_core::{keys, KvStore};

use crate::config::WorkerConfig;
use crate::error::ApiError;
use crate::metrics::Metrics;
use crate::proxy::UpstreamClient;
use crate::ratelimit::RateLimiter;
use crate::registry::AdapterRegistry;
use crate::vault::Vault;

#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub config: Arc<WorkerConfig>,
    pub vault: Vault,
    pub registry: Arc<AdapterRegistry>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        kv: Arc<dyn KvStore>,
        config: WorkerConfig,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        let vault = Vault::new(kv.clone(), &config.kek);
        let registry = Arc::new(AdapterRegistry::new(kv.clone()));
        Self {
            kv,
            config: Arc::new(config),
            vault,
            registry,
            upstream,
            limiter: Arc::new(RateLimiter::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Monotonic counter bumped by configuration-changing admin writes.
    pub async fn config_version(&self) -> Result<u64, ApiError> {
        Ok(self
            .kv
            .get(keys::META_VERSION)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    pub async fn bump_config_version(&self) -> Result<(), ApiError> {
        let next = self.config_version().await? + 1;
        self.kv
            .put(keys::META_VERSION, next.to_string(), None)
            .await?;
        Ok(())
    }
}
