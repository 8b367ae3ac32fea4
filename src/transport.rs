//! Ambient stack: host transport (§12).
//!
//! The host proxy's cluster/transport layer is out of scope for this core
//! (§1), so it is modeled as a small async trait. [`ReqwestTransport`] is a
//! fully-functional default implementation for standalone use and
//! integration testing; a real sidecar host would supply its own impl
//! backed by the proxy's own connection pool and cluster manager.

use crate::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of one key fetch (§4.5): 200 with a non-empty body is the only
/// success case.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(Vec<u8>),
    Failed(FetchError),
}

/// Resolves a symbolic `cluster` to an HTTP client and performs the GET.
/// `cluster` resolution is the host's job (§1); the default implementation
/// only threads it through as a tracing field.
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn fetch(&self, uri: &str, cluster: &str) -> FetchOutcome;
}

/// Default [`HostTransport`] backed by a shared `reqwest::Client` (rustls,
/// bounded per-call timeout).
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with static rustls config builds");
        ReqwestTransport { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HostTransport for ReqwestTransport {
    async fn fetch(&self, uri: &str, cluster: &str) -> FetchOutcome {
        info!(uri, cluster, "starting key fetch");
        let response = match self.client.get(uri).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(uri, cluster, error = %err, "key fetch transport error");
                return FetchOutcome::Failed(FetchError::Transport(err.to_string()));
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status().as_u16();
            warn!(uri, cluster, status, "key fetch non-200");
            return FetchOutcome::Failed(FetchError::BadStatus(status));
        }

        match response.bytes().await {
            Ok(body) if !body.is_empty() => FetchOutcome::Ok(body.to_vec()),
            Ok(_) => {
                warn!(uri, cluster, "key fetch returned empty body");
                FetchOutcome::Failed(FetchError::EmptyBody)
            }
            Err(err) => {
                warn!(uri, cluster, error = %err, "key fetch body read error");
                FetchOutcome::Failed(FetchError::Transport(err.to_string()))
            }
        }
    }
}
