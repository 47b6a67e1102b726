//! Azure Key Vault secret lookup over the REST API.
//!
//! Lists the vault's secrets page by page and returns the latest value of
//! the first secret whose name starts with the requested prefix.

use std::sync::Arc;

use aztunnel_core::{TunnelError, TunnelResult};
use serde::Deserialize;
use tracing::{debug, info};

use crate::credential::{CredentialProvider, KEY_VAULT_RESOURCE};

const API_VERSION: &str = "7.4";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretListPage {
    #[serde(default)]
    value: Vec<SecretItem>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Secret name from a secret identifier URL
/// (`https://<vault>.vault.azure.net/secrets/<name>[/<version>]`).
fn secret_name(id: &str) -> Option<&str> {
    let (_, rest) = id.split_once("/secrets/")?;
    rest.split('/').next().filter(|name| !name.is_empty())
}

/// Key Vault client bound to one vault.
pub struct KeyVaultClient {
    http: reqwest::Client,
    base_url: String,
    credential: Arc<dyn CredentialProvider>,
}

impl KeyVaultClient {
    /// Client for `https://<vault_name>.vault.azure.net`.
    pub fn new(vault_name: &str, credential: Arc<dyn CredentialProvider>) -> TunnelResult<Self> {
        if vault_name.trim().is_empty() {
            return Err(TunnelError::SecretLookup("vault name must not be empty".into()));
        }
        Ok(Self::with_base_url(
            format!("https://{vault_name}.vault.azure.net"),
            credential,
        ))
    }

    /// Client for an explicit vault URL.
    pub fn with_base_url(base_url: impl Into<String>, credential: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Return the value of the first secret named `key_prefix*`.
    ///
    /// # Errors
    ///
    /// [`TunnelError::SecretNotFound`] when no secret matches,
    /// [`TunnelError::SecretLookup`] on HTTP or decoding failures.
    pub async fn lookup(&self, key_prefix: &str) -> TunnelResult<String> {
        let token = self.credential.access_token(KEY_VAULT_RESOURCE).await?;
        let mut next = Some(format!("{}/secrets?api-version={API_VERSION}", self.base_url));
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            let page: SecretListPage = self.get_json(&url, &token.token).await.map_err(|e| {
                TunnelError::SecretLookup(format!("cannot paginate over secret list: {e}"))
            })?;
            debug!(page = pages, secrets = page.value.len(), "listed secrets");

            if let Some(name) = page
                .value
                .iter()
                .filter_map(|item| secret_name(&item.id))
                .find(|name| name.starts_with(key_prefix))
            {
                let url = format!("{}/secrets/{name}?api-version={API_VERSION}", self.base_url);
                let bundle: SecretBundle = self
                    .get_json(&url, &token.token)
                    .await
                    .map_err(|e| TunnelError::SecretLookup(format!("failed to get the secret: {e}")))?;
                let value = bundle
                    .value
                    .ok_or_else(|| TunnelError::SecretLookup(format!("secret '{name}' has no value")))?;
                info!(secret = %name, "secret retrieved");
                return Ok(value);
            }
            next = page.next_link.filter(|link| !link.is_empty());
        }

        Err(TunnelError::SecretNotFound(key_prefix.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T, String> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {}", body.trim()));
        }
        response.json::<T>().await.map_err(|e| e.to_string())
    }
}
