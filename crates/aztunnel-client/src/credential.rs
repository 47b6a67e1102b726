//! Access tokens for Azure data-plane calls.
//!
//! The Azure CLI login of the current user is reused: `az account
//! get-access-token` hands out a bearer token for the requested resource.

use async_trait::async_trait;
use aztunnel_core::{TunnelError, TunnelResult};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Resource identifier for Key Vault tokens.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

/// A bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Expiry as reported by the issuer, if any.
    pub expires_on: Option<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Supplies bearer tokens for a resource.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self, resource: &str) -> TunnelResult<AccessToken>;
}

/// Name of the Azure CLI executable. `AZ_CLI` overrides it.
pub fn az_program() -> String {
    if let Ok(program) = std::env::var("AZ_CLI") {
        if !program.trim().is_empty() {
            return program;
        }
    }
    if cfg!(windows) {
        "az.cmd".to_string()
    } else {
        "az".to_string()
    }
}

/// Credential backed by the Azure CLI.
#[derive(Debug, Clone)]
pub struct AzCliCredential {
    program: String,
    subscription: Option<String>,
}

impl Default for AzCliCredential {
    fn default() -> Self {
        Self {
            program: az_program(),
            subscription: None,
        }
    }
}

impl AzCliCredential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request tokens in the context of a specific subscription.
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    fn args(&self, resource: &str) -> Vec<String> {
        let mut args = vec![
            "account".to_string(),
            "get-access-token".to_string(),
            "--resource".to_string(),
            resource.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(sub) = &self.subscription {
            args.push("--subscription".to_string());
            args.push(sub.clone());
        }
        args
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
}

fn parse_cli_token(stdout: &[u8]) -> TunnelResult<AccessToken> {
    let token: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| TunnelError::Credential(format!("unexpected az output: {e}")))?;
    if token.access_token.is_empty() {
        return Err(TunnelError::Credential("az returned an empty token".into()));
    }
    Ok(AccessToken {
        token: token.access_token,
        expires_on: token.expires_on,
    })
}

#[async_trait]
impl CredentialProvider for AzCliCredential {
    async fn access_token(&self, resource: &str) -> TunnelResult<AccessToken> {
        debug!(program = %self.program, resource, "requesting access token");
        let output = Command::new(&self.program)
            .args(self.args(resource))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TunnelError::Credential(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TunnelError::Credential(format!(
                "failed to obtain a credential ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        parse_cli_token(&output.stdout)
    }
}

/// Fixed token, for tests and for callers that already hold one.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub AccessToken);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(AccessToken {
            token: token.into(),
            expires_on: None,
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn access_token(&self, _resource: &str) -> TunnelResult<AccessToken> {
        Ok(self.0.clone())
    }
}
