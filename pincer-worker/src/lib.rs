//! Pincer worker: a manifest-driven egress boundary. Agents hold a bearer
//! runtime key and a shared HMAC secret; provider credentials stay in the
//! vault behind this service, which constructs every outbound call from a
//! signed, admin-approved adapter manifest.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod models;
pub mod pairing;
pub mod proxy;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod vault;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use pincer_core::MemoryKv;

use crate::config::WorkerConfig;
use crate::proxy::ReqwestUpstream;

pub use state::AppState;

pub async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let listen_addr = config.listen_addr;
    let state = build_state(config);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {listen_addr}"))?;
    info!(%listen_addr, "worker listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(anyhow::Error::from)
}

/// The default deployment keeps its namespace in process memory; other
/// KV backends plug in through [`pincer_core::KvStore`].
pub fn build_state(config: WorkerConfig) -> AppState {
    AppState::new(
        Arc::new(MemoryKv::new()),
        config,
        Arc::new(ReqwestUpstream::new()),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
