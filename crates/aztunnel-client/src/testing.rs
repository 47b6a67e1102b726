//! In-memory doubles shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aztunnel_core::{TunnelError, TunnelResult};
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::channel::{ChannelOpener, TunnelChannel};
use crate::connector::Sleeper;
use crate::hook::ReadinessHook;
use crate::listener::Acceptor;

/// Records requested sleeps without waiting.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }

    pub fn calls(&self) -> usize {
        self.slept.lock().unwrap().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
struct MockState {
    dials: AtomicU32,
    fail_on: Mutex<HashSet<u32>>,
    hang_on: Mutex<HashSet<u32>>,
    destinations: Mutex<Vec<String>>,
    closed: AtomicBool,
}

/// Channel whose streams are in-memory echo servers.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<MockState>,
}

impl MockChannel {
    /// Make the `n`th dial (1-based) fail.
    pub fn fail_dial(&self, n: u32) {
        self.state.fail_on.lock().unwrap().insert(n);
    }

    /// Make the `n`th dial (1-based) never complete.
    pub fn hang_dial(&self, n: u32) {
        self.state.hang_on.lock().unwrap().insert(n);
    }

    pub fn dials(&self) -> u32 {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn destinations(&self) -> Vec<String> {
        self.state.destinations.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelChannel for MockChannel {
    type Stream = DuplexStream;

    async fn dial(&self, destination: &str, _origin: SocketAddr) -> TunnelResult<DuplexStream> {
        let n = self.state.dials.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.destinations.lock().unwrap().push(destination.to_string());
        if self.state.fail_on.lock().unwrap().contains(&n) {
            return Err(TunnelError::Dial {
                destination: destination.to_string(),
                reason: format!("administratively prohibited (dial {n})"),
            });
        }
        let hang = self.state.hang_on.lock().unwrap().contains(&n);
        if hang {
            std::future::pending::<()>().await;
        }

        let (near, far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(far);
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });
        Ok(near)
    }

    async fn close(&self) -> TunnelResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opener that fails a configured number of times before succeeding.
#[derive(Clone)]
pub struct FlakyOpener {
    failures: u32,
    attempts: Arc<AtomicU32>,
    channel: MockChannel,
}

impl FlakyOpener {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            attempts: Arc::new(AtomicU32::new(0)),
            channel: MockChannel::default(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> MockChannel {
        self.channel.clone()
    }
}

#[async_trait]
impl ChannelOpener for FlakyOpener {
    type Channel = MockChannel;

    fn endpoint(&self) -> String {
        "mock:22".to_string()
    }

    async fn open(&self) -> TunnelResult<MockChannel> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(TunnelError::Ssh(format!("connection refused (attempt {attempt})")));
        }
        Ok(self.channel.clone())
    }
}

/// Hook that reports the bound port, optionally failing afterwards.
pub struct SpyHook {
    port_tx: Mutex<Option<oneshot::Sender<u16>>>,
    calls: Arc<AtomicU32>,
    fail: bool,
}

impl SpyHook {
    pub fn new(fail: bool) -> (Self, oneshot::Receiver<u16>, Arc<AtomicU32>) {
        let (tx, rx) = oneshot::channel();
        let calls = Arc::new(AtomicU32::new(0));
        let hook = Self {
            port_tx: Mutex::new(Some(tx)),
            calls: calls.clone(),
            fail,
        };
        (hook, rx, calls)
    }
}

#[async_trait]
impl ReadinessHook for SpyHook {
    async fn handle(&self, listener: &TcpListener) -> TunnelResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let port = listener.local_addr()?.port();
        let tx = self.port_tx.lock().unwrap().take();
        if let Some(tx) = tx {
            let _ = tx.send(port);
        }
        if self.fail {
            return Err(TunnelError::Handler("spy refused".into()));
        }
        Ok(())
    }
}

/// Acceptor that replays a fixed script, then waits forever.
pub struct ScriptedAcceptor {
    script: Mutex<VecDeque<TunnelResult<(DuplexStream, SocketAddr)>>>,
}

impl ScriptedAcceptor {
    pub fn new(script: Vec<TunnelResult<(DuplexStream, SocketAddr)>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Acceptor for ScriptedAcceptor {
    type Conn = DuplexStream;

    async fn accept(&self) -> TunnelResult<(DuplexStream, SocketAddr)> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}
