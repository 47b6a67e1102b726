//! Tunnel configuration loaded from a YAML file.
//!
//! Every required field must be present and non-empty; [`TunnelConfig::load`]
//! reports all missing fields at once.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{TunnelError, TunnelResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TunnelConfig {
    /// Azure subscription id hosting the bastion.
    #[serde(rename = "subscription", default)]
    pub subscription_id: String,

    #[serde(default)]
    pub resource_group: String,

    #[serde(default)]
    pub vault: VaultSection,

    #[serde(default)]
    pub bastion: BastionSection,

    #[serde(default)]
    pub ssh: SshSection,

    /// Kubeconfig cluster entry to point at the forwarded port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

/// `vault:` section. Holds the SSH private key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultSection {
    #[serde(default)]
    pub name: String,
    /// The first secret whose name starts with this prefix is used.
    #[serde(default)]
    pub key_prefix: String,
}

/// `bastion:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BastionSection {
    #[serde(default)]
    pub name: String,
    /// Name of the virtual machine the bastion tunnels to.
    #[serde(default)]
    pub server: String,
}

/// `ssh:` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshSection {
    #[serde(default)]
    pub user: String,
    /// Local listen port. `0` picks an ephemeral port.
    #[serde(default)]
    pub port: u16,
    /// `host:port` dialed through the SSH connection.
    #[serde(default)]
    pub dest: String,
}

impl TunnelConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> TunnelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("cannot open config file {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml(content: &str) -> TunnelResult<Self> {
        let config: TunnelConfig = serde_yaml::from_str(content)
            .map_err(|e| TunnelError::Config(format!("cannot decode config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required field is set.
    pub fn validate(&self) -> TunnelResult<()> {
        let required = [
            ("subscription", &self.subscription_id),
            ("resource-group", &self.resource_group),
            ("vault.name", &self.vault.name),
            ("vault.key-prefix", &self.vault.key_prefix),
            ("bastion.name", &self.bastion.name),
            ("bastion.server", &self.bastion.server),
            ("ssh.user", &self.ssh.user),
            ("ssh.dest", &self.ssh.dest),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(TunnelError::Config(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        parse_destination(&self.ssh.dest)?;

        if matches!(&self.cluster, Some(name) if name.trim().is_empty()) {
            return Err(TunnelError::Config("cluster must not be empty when set".into()));
        }
        Ok(())
    }

    /// Resource id of the bastion target VM.
    pub fn target_resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.subscription_id, self.resource_group, self.bastion.server
        )
    }
}

/// Split a `host:port` destination into its parts.
///
/// IPv6 literals may be bracketed (`[::1]:22`); brackets are stripped.
pub fn parse_destination(dest: &str) -> TunnelResult<(String, u16)> {
    let (host, port) = dest
        .rsplit_once(':')
        .ok_or_else(|| TunnelError::Config(format!("destination '{dest}' is not host:port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TunnelError::Config(format!("empty host in destination '{dest}'")));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| TunnelError::Config(format!("invalid port in destination '{dest}'")))?;
    Ok((host.to_string(), port))
}
