//! Environment-driven configuration for the worker boundary.

use std::net::SocketAddr;

use anyhow::Context;

pub const SERVICE_NAME: &str = "pincer-worker";

/// Default vault binding names for the runtime auth secrets; a runtime
/// record may override either.
pub const DEFAULT_HMAC_BINDING: &str = "PINCER_HMAC_SECRET_ACTIVE";
pub const DEFAULT_KEY_BINDING: &str = "PINCER_RUNTIME_KEY_SECRET_ACTIVE";

pub fn service_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[derive(Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    /// Externally reachable URL of this worker; handed to agents by pairing.
    pub public_url: String,
    /// Shared secret gating first-time admin bootstrap.
    pub bootstrap_token: String,
    /// Key-encrypting key the vault data key is derived from.
    pub kek: String,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr: SocketAddr = std::env::var("PINCER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
            .parse()
            .context("PINCER_LISTEN_ADDR must be a socket address")?;

        let public_url = std::env::var("PINCER_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{listen_addr}"));

        let bootstrap_token =
            std::env::var("PINCER_BOOTSTRAP_TOKEN").context("PINCER_BOOTSTRAP_TOKEN is required")?;
        let kek = std::env::var("PINCER_KEK").context("PINCER_KEK is required")?;

        Ok(Self {
            listen_addr,
            public_url,
            bootstrap_token,
            kek,
        })
    }
}
