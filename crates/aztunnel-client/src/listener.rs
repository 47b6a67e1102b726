//! Local TCP listener for the forwarded port.
//!
//! Binds once, fails fast when the address is taken, and hands out accepted
//! connections one at a time in arrival order.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use aztunnel_core::{TunnelError, TunnelResult};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Source of inbound connections for the accept loop.
#[async_trait]
pub(crate) trait Acceptor: Send + Sync {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self) -> TunnelResult<(Self::Conn, SocketAddr)>;
}

/// Owns the bound listener. Dropping it closes the socket.
pub struct ListenerManager {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListenerManager {
    /// Bind `host:port`. Use port `0` for an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Bind`] when the address is in use or cannot
    /// be bound. There is no retry.
    pub async fn bind(host: &str, port: u16) -> TunnelResult<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| TunnelError::Bind { addr: addr.clone(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind { addr: addr.clone(), source })?;

        info!(requested = %addr, actual_port = local_addr.port(), "local listener bound");
        Ok(Self { listener, local_addr })
    }

    /// The address the OS actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The underlying listener, for readiness hooks.
    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    /// Wait for the next inbound connection.
    ///
    /// Nagle is disabled on the accepted stream; interactive protocols are
    /// the common payload.
    pub async fn accept(&self) -> TunnelResult<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.map_err(TunnelError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "cannot disable nagle on accepted stream");
        }
        Ok((stream, peer))
    }
}

#[async_trait]
impl Acceptor for ListenerManager {
    type Conn = TcpStream;

    async fn accept(&self) -> TunnelResult<(TcpStream, SocketAddr)> {
        ListenerManager::accept(self).await
    }
}

/// Accept errors that concern a single connection and leave the listener
/// usable.
pub(crate) fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let manager = ListenerManager::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(manager.local_port(), 0);
        assert_eq!(
            manager.listener().local_addr().unwrap().port(),
            manager.local_port()
        );
    }

    #[tokio::test]
    async fn bind_in_use_fails_fast() {
        let first = ListenerManager::bind("127.0.0.1", 0).await.unwrap();
        let err = ListenerManager::bind("127.0.0.1", first.local_port())
            .await
            .err()
            .expect("second bind must fail");
        assert!(matches!(err, TunnelError::Bind { .. }), "got {err}");
    }

    #[tokio::test]
    async fn accepts_in_arrival_order() {
        let manager = ListenerManager::bind("127.0.0.1", 0).await.unwrap();
        let addr = manager.local_addr();

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"1").await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"2").await.unwrap();

        for expected in [b'1', b'2'] {
            let (mut conn, peer) = manager.accept().await.unwrap();
            assert!(peer.ip().is_loopback());
            assert!(conn.nodelay().unwrap());
            let mut buf = [0u8; 1];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf[0], expected);
        }
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient_accept_error(&io::ErrorKind::ConnectionAborted.into()));
        assert!(is_transient_accept_error(&io::ErrorKind::Interrupted.into()));
        assert!(!is_transient_accept_error(&io::ErrorKind::InvalidInput.into()));
        assert!(!is_transient_accept_error(&io::ErrorKind::PermissionDenied.into()));
    }
}
