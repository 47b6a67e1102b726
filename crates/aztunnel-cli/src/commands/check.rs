//! `aztunnel check`: validate a config file without touching Azure.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use aztunnel_core::TunnelConfig;

pub fn run(config_path: &Path) -> Result<()> {
    let cfg = TunnelConfig::load(config_path)
        .with_context(|| format!("invalid config file {}", config_path.display()))?;
    let stdout = std::io::stdout();
    summarize(&cfg, &mut stdout.lock())
}

fn summarize(cfg: &TunnelConfig, out: &mut impl Write) -> Result<()> {
    let local = match cfg.ssh.port {
        0 => "localhost:<ephemeral>".to_string(),
        port => format!("localhost:{port}"),
    };
    writeln!(out, "subscription:  {}", cfg.subscription_id)?;
    writeln!(out, "bastion:       {} ({})", cfg.bastion.name, cfg.resource_group)?;
    writeln!(out, "target:        {}", cfg.target_resource_id())?;
    writeln!(out, "ssh key:       {}/{}*", cfg.vault.name, cfg.vault.key_prefix)?;
    writeln!(out, "forward:       {local} -> {}@{}", cfg.ssh.user, cfg.ssh.dest)?;
    if let Some(cluster) = &cfg.cluster {
        writeln!(out, "kube cluster:  {cluster}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
subscription: sub-1
resource-group: rg-platform
vault:
  name: kv-platform
  key-prefix: jump-ssh
bastion:
  name: bas-platform
  server: vm-jump
ssh:
  user: azureuser
  dest: 10.1.0.4:443
cluster: aks-dev
";

    #[test]
    fn summary_lists_every_section() {
        let cfg = TunnelConfig::from_yaml(CONFIG).unwrap();
        let mut out = Vec::new();
        summarize(&cfg, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("bas-platform (rg-platform)"));
        assert!(text.contains("virtualMachines/vm-jump"));
        assert!(text.contains("kv-platform/jump-ssh*"));
        assert!(text.contains("localhost:<ephemeral> -> azureuser@10.1.0.4:443"));
        assert!(text.contains("kube cluster:  aks-dev"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel.yaml");
        std::fs::write(&path, "subscription: sub-1\nssh: {dest: nope}\n").unwrap();
        let err = run(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid config file"));
    }
}
