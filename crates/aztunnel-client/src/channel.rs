//! Abstract tunnel channel traits.
//!
//! The engine only needs two capabilities from a transport: something that
//! can be opened (possibly failing, so it can be retried) and, once open,
//! something that dials new logical streams to a destination.

use std::net::SocketAddr;

use async_trait::async_trait;
use aztunnel_core::TunnelResult;
use tokio::io::{AsyncRead, AsyncWrite};

/// An established, authenticated transport able to open logical streams.
///
/// `dial` takes `&self` and must be safe to call from concurrent tasks.
#[async_trait]
pub trait TunnelChannel: Send + Sync + 'static {
    /// Stream type returned for each dialed destination.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream to `destination` (`host:port`).
    ///
    /// `origin` is the peer address of the local connection the stream
    /// will be paired with.
    async fn dial(&self, destination: &str, origin: SocketAddr) -> TunnelResult<Self::Stream>;

    /// Close the channel. Streams dialed from it end with it.
    async fn close(&self) -> TunnelResult<()>;
}

/// One attempt at opening a [`TunnelChannel`].
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    type Channel: TunnelChannel;

    /// Human-readable endpoint, used in log lines.
    fn endpoint(&self) -> String;

    /// Try once to open the channel.
    async fn open(&self) -> TunnelResult<Self::Channel>;
}
