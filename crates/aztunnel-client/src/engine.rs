//! The forwarding engine.
//!
//! Drives one tunnel run through its states:
//!
//! ```text
//! Idle → Connecting → Listening → Serving → ShuttingDown
//!           │             │           │
//!           └─ ConnectError           └─ shutdown signal / fatal accept error
//!                         └─ BindError / HandlerError
//! ```
//!
//! Each accepted connection gets its own session task, spawned in arrival
//! order, which dials the destination and then runs the
//! [`bridge`](crate::bridge::bridge). A slow or failed dial affects only
//! that connection; the accept loop and the shutdown signal stay responsive.

use std::future::Future;
use std::sync::Arc;

use aztunnel_core::{TunnelError, TunnelResult};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bridge::bridge;
use crate::channel::{ChannelOpener, TunnelChannel};
use crate::connector::{Connector, Sleeper, TokioSleeper};
use crate::hook::ReadinessHook;
use crate::listener::{is_transient_accept_error, Acceptor, ListenerManager};

/// Engine state, observable through [`ForwardingEngine::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    Listening,
    Serving,
    ShuttingDown,
}

/// Already-validated settings for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Local interface to bind.
    pub bind_host: String,
    /// Local port; `0` picks an ephemeral port.
    pub local_port: u16,
    /// `host:port` dialed over the channel for every inbound connection.
    pub destination: String,
    /// Abort in-flight sessions on shutdown instead of letting them finish.
    pub abort_sessions_on_shutdown: bool,
}

impl EngineConfig {
    pub fn new(destination: impl Into<String>, local_port: u16) -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            local_port,
            destination: destination.into(),
            abort_sessions_on_shutdown: false,
        }
    }
}

/// Composition root: owns the connector, the optional readiness hook and
/// the run configuration.
pub struct ForwardingEngine<O, S = TokioSleeper> {
    connector: Connector<O, S>,
    config: EngineConfig,
    hook: Option<Box<dyn ReadinessHook>>,
    state_tx: watch::Sender<EngineState>,
}

impl<O: ChannelOpener> ForwardingEngine<O, TokioSleeper> {
    /// Engine with the default retry policy.
    pub fn new(opener: O, config: EngineConfig) -> Self {
        Self::from_connector(Connector::new(opener), config)
    }
}

impl<O: ChannelOpener, S: Sleeper> ForwardingEngine<O, S> {
    pub fn from_connector(connector: Connector<O, S>, config: EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Idle);
        Self {
            connector,
            config,
            hook: None,
            state_tx,
        }
    }

    /// Install the hook run once the listener is bound.
    pub fn with_hook(mut self, hook: impl ReadinessHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// [`TunnelError::Connect`], [`TunnelError::Bind`],
    /// [`TunnelError::Handler`] during startup, or [`TunnelError::Accept`]
    /// when the listener breaks. Per-connection failures are logged only.
    pub async fn run<F>(self, shutdown: F) -> TunnelResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.set_state(EngineState::Connecting);
        let channel = match self.connector.establish().await {
            Ok(channel) => channel,
            Err(e) => {
                self.set_state(EngineState::ShuttingDown);
                debug!(error = %e, "unable to establish tunnel channel");
                return Err(e);
            }
        };
        let channel = Arc::new(channel);

        self.set_state(EngineState::Listening);
        let listener = match ListenerManager::bind(&self.config.bind_host, self.config.local_port).await {
            Ok(listener) => listener,
            Err(e) => return self.abort_startup(&channel, e).await,
        };
        info!(
            port = listener.local_port(),
            destination = %self.config.destination,
            "waiting on 'localhost:{}'",
            listener.local_port()
        );

        if let Some(hook) = &self.hook {
            if let Err(e) = hook.handle(listener.listener()).await {
                let e = match e {
                    TunnelError::Handler(_) => e,
                    other => TunnelError::Handler(other.to_string()),
                };
                drop(listener);
                return self.abort_startup(&channel, e).await;
            }
        }

        self.set_state(EngineState::Serving);
        let result = self.serve(&channel, &listener, shutdown).await;

        self.set_state(EngineState::ShuttingDown);
        drop(listener);
        if let Err(e) = channel.close().await {
            warn!(error = %e, "error closing tunnel channel");
        }
        info!("tunnel stopped");
        result
    }

    async fn serve<A, F>(&self, channel: &Arc<O::Channel>, acceptor: &A, shutdown: F) -> TunnelResult<()>
    where
        A: Acceptor,
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        let mut next_session_id: u64 = 1;

        let result = loop {
            // Reap finished sessions.
            while sessions.try_join_next().is_some() {}

            tokio::select! {
                _ = &mut shutdown => {
                    info!(active_sessions = sessions.len(), "shutdown requested");
                    break Ok(());
                }
                accepted = acceptor.accept() => match accepted {
                    Ok((local, peer)) => {
                        let session_id = next_session_id;
                        next_session_id += 1;
                        let channel = Arc::clone(channel);
                        let destination = self.config.destination.clone();

                        sessions.spawn(async move {
                            match channel.dial(&destination, peer).await {
                                Ok(remote) => {
                                    info!(session_id, peer = %peer, destination = %destination, "tunnel established");
                                    bridge(session_id, local, remote).await;
                                }
                                Err(e) => {
                                    warn!(session_id, peer = %peer, error = %e, "dial failed, dropping inbound connection");
                                    drop(local);
                                }
                            }
                        });
                    }
                    Err(TunnelError::Accept(e)) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "transient accept error");
                    }
                    Err(e) => {
                        debug!(error = %e, "listener failed");
                        break Err(e);
                    }
                }
            }
        };

        if self.config.abort_sessions_on_shutdown {
            debug!(sessions = sessions.len(), "aborting in-flight sessions");
            sessions.abort_all();
        } else {
            debug!(sessions = sessions.len(), "leaving in-flight sessions to finish");
            sessions.detach_all();
        }
        result
    }

    async fn abort_startup(&self, channel: &O::Channel, err: TunnelError) -> TunnelResult<()> {
        self.set_state(EngineState::ShuttingDown);
        debug!(error = %err, "tunnel startup aborted");
        if let Err(e) = channel.close().await {
            warn!(error = %e, "error closing tunnel channel");
        }
        Err(err)
    }

    fn set_state(&self, state: EngineState) {
        debug!(?state, "engine state");
        self.state_tx.send_replace(state);
    }
}
