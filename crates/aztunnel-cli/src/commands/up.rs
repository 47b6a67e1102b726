//! `aztunnel up`: open the tunnel and forward until interrupted.
//!
//! 1. Fetch the SSH private key from Key Vault.
//! 2. Start `az network bastion tunnel` on a free loopback port.
//! 3. Run the forwarding engine over an SSH session through that port.
//!
//! The run ends on Ctrl-C, on a fatal engine error, or when the bastion
//! process exits underneath it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use aztunnel_client::{
    free_local_port, AzCliCredential, BastionSpec, BastionTunnel, EngineConfig, ForwardingEngine,
    KeyVaultClient, KubeConfigHook, SshOpener,
};
use aztunnel_core::TunnelConfig;
use tracing::{info, warn};

pub async fn run(config_path: &Path) -> Result<()> {
    let cfg = TunnelConfig::load(config_path)
        .with_context(|| format!("cannot load config file {}", config_path.display()))?;

    let credential = Arc::new(AzCliCredential::new().with_subscription(&cfg.subscription_id));
    let vault = KeyVaultClient::new(&cfg.vault.name, credential)?;
    let key_pem = vault
        .lookup(&cfg.vault.key_prefix)
        .await
        .with_context(|| format!("cannot read SSH key from vault '{}'", cfg.vault.name))?;

    let tunnel_port = free_local_port().context("cannot find a free port for the bastion tunnel")?;
    let spec = BastionSpec::from_config(&cfg, tunnel_port);
    let mut bastion = BastionTunnel::spawn(&spec)?;

    let opener = SshOpener::from_pem(format!("127.0.0.1:{tunnel_port}"), &cfg.ssh.user, &key_pem)?;
    let mut engine = ForwardingEngine::new(opener, EngineConfig::new(&cfg.ssh.dest, cfg.ssh.port));
    if let Some(cluster) = &cfg.cluster {
        engine = engine.with_hook(KubeConfigHook::new(cluster));
    }

    let result = tokio::select! {
        r = engine.run(shutdown_signal()) => r.context("tunnel failed"),
        status = bastion.wait() => match status {
            Ok(status) => Err(anyhow!("bastion tunnel process exited ({status})")),
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = bastion.shutdown().await {
        warn!(error = %e, "failed to stop bastion tunnel process");
    }
    if result.is_ok() {
        info!("tunnel closed");
    }
    result
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => {
            // Without a signal handler the tunnel runs until killed.
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("missing.yaml")).await.unwrap_err();
        assert!(format!("{err:#}").contains("cannot load config file"));
    }

    #[tokio::test]
    async fn invalid_config_stops_before_any_azure_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel.yaml");
        std::fs::write(&path, "subscription: sub-1\n").unwrap();

        let err = run(&path).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("resource-group"), "got {msg}");
    }
}
