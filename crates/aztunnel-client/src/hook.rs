//! Readiness hooks, run once after the local listener is bound.

use std::path::PathBuf;

use async_trait::async_trait;
use aztunnel_core::{KubeConfig, TunnelError, TunnelResult};
use tokio::net::TcpListener;
use tracing::info;

/// Publishes the bound listener to whoever needs to find it.
///
/// A failing hook aborts engine startup before any connection is accepted.
#[async_trait]
pub trait ReadinessHook: Send + Sync {
    async fn handle(&self, listener: &TcpListener) -> TunnelResult<()>;
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl ReadinessHook for NoopHook {
    async fn handle(&self, _listener: &TcpListener) -> TunnelResult<()> {
        Ok(())
    }
}

/// Points a kubeconfig cluster entry at `https://localhost:<bound port>`.
#[derive(Debug, Clone)]
pub struct KubeConfigHook {
    cluster_name: String,
    path: Option<PathBuf>,
    insecure_skip_tls_verify: bool,
}

impl KubeConfigHook {
    /// Hook writing to the default kubeconfig location.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            path: None,
            insecure_skip_tls_verify: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    /// Rewrite the cluster entry for `port`.
    pub fn apply(&self, port: u16) -> TunnelResult<()> {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => KubeConfig::default_path()?,
        };
        let server = format!("https://localhost:{port}");

        let mut kubeconfig = KubeConfig::load(path)?;
        kubeconfig.set_cluster(&self.cluster_name, self.insecure_skip_tls_verify, &server)?;
        kubeconfig.save()?;

        info!(cluster = %self.cluster_name, server = %server, "kubeconfig cluster updated");
        Ok(())
    }
}

#[async_trait]
impl ReadinessHook for KubeConfigHook {
    async fn handle(&self, listener: &TcpListener) -> TunnelResult<()> {
        let port = listener.local_addr()?.port();
        let hook = self.clone();
        tokio::task::spawn_blocking(move || hook.apply(port))
            .await
            .map_err(|e| TunnelError::Handler(format!("kubeconfig task failed: {e}")))?
            .map_err(|e| TunnelError::Handler(e.to_string()))
    }
}
