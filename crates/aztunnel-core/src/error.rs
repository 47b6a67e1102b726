use thiserror::Error;

/// Errors produced while setting up or running a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The channel could not be established within the retry budget.
    #[error("failed to establish channel after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: Box<TunnelError>,
    },

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("readiness hook failed: {0}")]
    Handler(String),

    #[error("failed to dial {destination}: {reason}")]
    Dial { destination: String, reason: String },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("session i/o error: {0}")]
    SessionIo(#[source] std::io::Error),

    #[error("ssh error: {0}")]
    Ssh(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("secret lookup failed: {0}")]
    SecretLookup(String),

    #[error("no secret found with prefix '{0}'")]
    SecretNotFound(String),

    #[error("tunnel provisioner error: {0}")]
    Provision(String),

    #[error("kubeconfig error: {0}")]
    KubeConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Whether this error ends a tunnel run.
    ///
    /// Dial and session errors only affect a single inbound connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TunnelError::Dial { .. } | TunnelError::SessionIo(_))
    }
}

pub type TunnelResult<T> = Result<T, TunnelError>;
