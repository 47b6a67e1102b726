//! aztunnel-core: shared pieces of the bastion tunnel.
//!
//! Provides the error type used across the workspace, the YAML tunnel
//! configuration with its validation rules, and kubeconfig cluster editing.

pub mod config;
pub mod error;
pub mod kubeconfig;

// Re-export commonly used items at crate root.
pub use config::{parse_destination, TunnelConfig};
pub use error::{TunnelError, TunnelResult};
pub use kubeconfig::KubeConfig;
