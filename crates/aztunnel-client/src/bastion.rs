//! Azure Bastion tunnel process.
//!
//! `az network bastion tunnel` opens a local port that forwards to the
//! target VM's SSH port. The process is spawned in the background and
//! killed when the [`BastionTunnel`] is dropped.

use std::net::{Ipv4Addr, TcpListener as StdTcpListener};
use std::process::{ExitStatus, Stdio};

use aztunnel_core::{TunnelConfig, TunnelError, TunnelResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::credential::az_program;

/// Remote port the bastion connects to on the target VM.
pub const SSH_RESOURCE_PORT: u16 = 22;

/// Everything needed to open one bastion tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BastionSpec {
    pub subscription_id: String,
    pub resource_group: String,
    pub bastion_name: String,
    pub target_resource_id: String,
    pub local_port: u16,
    pub resource_port: u16,
}

impl BastionSpec {
    /// Spec for the tunnel described by `config`, opened on `local_port`.
    pub fn from_config(config: &TunnelConfig, local_port: u16) -> Self {
        Self {
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            bastion_name: config.bastion.name.clone(),
            target_resource_id: config.target_resource_id(),
            local_port,
            resource_port: SSH_RESOURCE_PORT,
        }
    }

    /// Arguments passed to `az`.
    pub fn args(&self) -> Vec<String> {
        vec![
            "network".to_string(),
            "bastion".to_string(),
            "tunnel".to_string(),
            format!("--subscription={}", self.subscription_id),
            format!("--target-resource-id={}", self.target_resource_id),
            format!("--port={}", self.local_port),
            format!("--name={}", self.bastion_name),
            format!("--resource-group={}", self.resource_group),
            format!("--resource-port={}", self.resource_port),
        ]
    }

    fn validate(&self) -> TunnelResult<()> {
        if self.subscription_id.is_empty() {
            return Err(TunnelError::Provision("subscription id is required to start tunnel".into()));
        }
        if self.resource_group.is_empty() {
            return Err(TunnelError::Provision("resource-group is required to start tunnel".into()));
        }
        if self.local_port == 0 {
            return Err(TunnelError::Provision("tunnel port must be chosen before spawning".into()));
        }
        Ok(())
    }
}

/// Find a free loopback port by binding port 0 and releasing it.
pub fn free_local_port() -> TunnelResult<u16> {
    let listener = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// A running `az network bastion tunnel` process.
pub struct BastionTunnel {
    child: Child,
    local_port: u16,
}

impl BastionTunnel {
    /// Spawn the tunnel process with the default `az` executable.
    pub fn spawn(spec: &BastionSpec) -> TunnelResult<Self> {
        Self::spawn_with(&az_program(), spec)
    }

    /// Spawn `program` with the bastion arguments.
    pub fn spawn_with(program: &str, spec: &BastionSpec) -> TunnelResult<Self> {
        spec.validate()?;
        let mut child = Command::new(program)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TunnelError::Provision(format!("failed to run {program}: {e}")))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_output("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_output("stderr", stderr));
        }

        info!(
            bastion = %spec.bastion_name,
            port = spec.local_port,
            pid = child.id().unwrap_or_default(),
            "bastion tunnel process started"
        );
        Ok(Self {
            child,
            local_port: spec.local_port,
        })
    }

    /// Local port the tunnel listens on.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> TunnelResult<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| TunnelError::Provision(format!("failed to wait for tunnel process: {e}")))
    }

    /// Kill the process and reap it.
    pub async fn shutdown(mut self) -> TunnelResult<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
            debug!("bastion tunnel process killed");
        }
        Ok(())
    }
}

async fn log_output<R: AsyncRead + Unpin>(stream: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            debug!(target: "aztunnel::bastion", stream, "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(port: u16) -> BastionSpec {
        BastionSpec {
            subscription_id: "sub-1".into(),
            resource_group: "rg-platform".into(),
            bastion_name: "bas-platform".into(),
            target_resource_id: "/subscriptions/sub-1/resourceGroups/rg-platform/providers/Microsoft.Compute/virtualMachines/vm-jump".into(),
            local_port: port,
            resource_port: SSH_RESOURCE_PORT,
        }
    }

    #[test]
    fn az_arguments() {
        assert_eq!(
            spec(50022).args(),
            vec![
                "network",
                "bastion",
                "tunnel",
                "--subscription=sub-1",
                "--target-resource-id=/subscriptions/sub-1/resourceGroups/rg-platform/providers/Microsoft.Compute/virtualMachines/vm-jump",
                "--port=50022",
                "--name=bas-platform",
                "--resource-group=rg-platform",
                "--resource-port=22",
            ]
        );
    }

    #[test]
    fn spec_from_config() {
        let config = TunnelConfig::from_yaml(
            "subscription: sub-1\nresource-group: rg-platform\nvault: {name: kv, key-prefix: k}\n\
             bastion: {name: bas-platform, server: vm-jump}\nssh: {user: u, dest: '10.0.0.4:22'}\n",
        )
        .unwrap();
        assert_eq!(BastionSpec::from_config(&config, 50022), spec(50022));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut s = spec(50022);
        s.resource_group.clear();
        assert!(matches!(
            BastionTunnel::spawn_with("az", &s),
            Err(TunnelError::Provision(_))
        ));
        assert!(BastionTunnel::spawn_with("az", &spec(0)).is_err());
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_local_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_program_is_a_provision_error() {
        let result = BastionTunnel::spawn_with("aztunnel-definitely-missing-az", &spec(50022));
        assert!(matches!(result, Err(TunnelError::Provision(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_is_observed() {
        let mut tunnel = BastionTunnel::spawn_with("true", &spec(50022)).unwrap();
        let status = tunnel.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(tunnel.local_port(), 50022);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_reaps_process() {
        // `cat` exits on its own once it fails to open the argument files;
        // shutdown must succeed whether or not it already has.
        let tunnel = BastionTunnel::spawn_with("cat", &spec(50022)).unwrap();
        tunnel.shutdown().await.unwrap();
    }
}
