//! aztunnel-client: the tunnel forwarding engine.
//!
//! Establishes an SSH channel through a locally provisioned Azure Bastion
//! tunnel, binds a local TCP listener, and relays every accepted connection
//! to a fixed destination over that channel.
//!
//! # Quick Start
//!
//! ```no_run
//! use aztunnel_client::{EngineConfig, ForwardingEngine, SshOpener};
//!
//! # async fn example(key_pem: &str) -> aztunnel_core::TunnelResult<()> {
//! let opener = SshOpener::from_pem("127.0.0.1:50022", "azureuser", key_pem)?;
//! let engine = ForwardingEngine::new(opener, EngineConfig::new("10.1.0.4:443", 0));
//! engine.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod bastion;
pub mod bridge;
pub mod channel;
pub mod connector;
pub mod credential;
pub mod engine;
pub mod hook;
pub mod listener;
pub mod ssh;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary public types.
pub use bastion::{free_local_port, BastionSpec, BastionTunnel};
pub use bridge::bridge;
pub use channel::{ChannelOpener, TunnelChannel};
pub use connector::{Connector, RetryPolicy, Sleeper, TokioSleeper};
pub use credential::{AccessToken, AzCliCredential, CredentialProvider, StaticCredential};
pub use engine::{EngineConfig, EngineState, ForwardingEngine};
pub use hook::{KubeConfigHook, NoopHook, ReadinessHook};
pub use listener::ListenerManager;
pub use ssh::{SshChannel, SshOpener};
pub use vault::KeyVaultClient;

// Re-export core error types for convenience.
pub use aztunnel_core::{TunnelError, TunnelResult};
