//! SSH transport: one authenticated `russh` client session per run, with a
//! `direct-tcpip` channel per forwarded connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aztunnel_core::{parse_destination, TunnelError, TunnelResult};
use russh::client::{self, AuthResult, Handle};
use russh::keys::{self, HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelStream, Disconnect};
use tracing::debug;

use crate::channel::{ChannelOpener, TunnelChannel};

/// Client handler for the bastion endpoint.
///
/// The endpoint is a loopback port opened moments ago by the bastion tunnel
/// process, so any host key is accepted; its fingerprint is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BastionHandler;

impl client::Handler for BastionHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        key: &PublicKey,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        let algo = key.algorithm().to_string();
        async move {
            debug!(algo, fp = %fingerprint, "accepting bastion host key");
            Ok(true)
        }
    }
}

/// Parse an OpenSSH or PEM private key.
pub fn parse_private_key(pem: &str) -> TunnelResult<PrivateKey> {
    match PrivateKey::from_openssh(pem.trim()) {
        Ok(key) => Ok(key),
        Err(openssh_err) => match keys::decode_secret_key(pem, None) {
            Ok(key) => Ok(key),
            Err(keys::Error::KeyIsEncrypted) => Err(TunnelError::InvalidKey(
                "encrypted private keys are not supported".into(),
            )),
            Err(e) => Err(TunnelError::InvalidKey(format!(
                "not a valid OpenSSH or PEM private key ({openssh_err}; {e})"
            ))),
        },
    }
}

/// Opens authenticated SSH sessions to a fixed address.
pub struct SshOpener {
    address: String,
    username: String,
    key: Arc<PrivateKey>,
    config: Arc<client::Config>,
}

impl SshOpener {
    pub fn new(address: impl Into<String>, username: impl Into<String>, key: PrivateKey) -> Self {
        let config = client::Config {
            nodelay: true,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            address: address.into(),
            username: username.into(),
            key: Arc::new(key),
            config: Arc::new(config),
        }
    }

    /// Build an opener from key material as stored in the vault.
    pub fn from_pem(address: impl Into<String>, username: impl Into<String>, pem: &str) -> TunnelResult<Self> {
        let key = parse_private_key(pem)?;
        Ok(Self::new(address, username, key))
    }
}

#[async_trait]
impl ChannelOpener for SshOpener {
    type Channel = SshChannel;

    fn endpoint(&self) -> String {
        self.address.clone()
    }

    async fn open(&self) -> TunnelResult<SshChannel> {
        let mut handle = client::connect(self.config.clone(), self.address.as_str(), BastionHandler)
            .await
            .map_err(|e| TunnelError::Ssh(format!("connect to {}: {e}", self.address)))?;

        let rsa_hint = handle.best_supported_rsa_hash().await.unwrap_or(None).flatten();
        let key = PrivateKeyWithHashAlg::new(self.key.clone(), rsa_hint);
        let auth = handle
            .authenticate_publickey(self.username.clone(), key)
            .await
            .map_err(|e| TunnelError::Ssh(e.to_string()))?;

        match auth {
            AuthResult::Success => {
                debug!(user = %self.username, "publickey authentication succeeded");
                Ok(SshChannel { handle })
            }
            AuthResult::Failure { .. } => Err(TunnelError::AuthFailed(format!(
                "publickey rejected for user '{}'",
                self.username
            ))),
        }
    }
}

/// An authenticated SSH session.
pub struct SshChannel {
    handle: Handle<BastionHandler>,
}

#[async_trait]
impl TunnelChannel for SshChannel {
    type Stream = ChannelStream<client::Msg>;

    async fn dial(&self, destination: &str, origin: SocketAddr) -> TunnelResult<Self::Stream> {
        let (host, port) = parse_destination(destination)?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port.into(), origin.ip().to_string(), origin.port().into())
            .await
            .map_err(|e| TunnelError::Dial {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?;
        Ok(channel.into_stream())
    }

    async fn close(&self) -> TunnelResult<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "tunnel closed", "en")
            .await
            .map_err(|e| TunnelError::Ssh(e.to_string()))
    }
}
