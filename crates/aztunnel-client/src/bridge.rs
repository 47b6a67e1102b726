//! Bidirectional session relay.
//!
//! Each direction runs in its own task and reports on a completion channel
//! of capacity two. The bridge waits for the first report only: when either
//! direction ends, both tasks are aborted and both endpoints are dropped, so
//! the peer of the still-open side sees the connection close. The copy tasks
//! live in a [`JoinSet`], so dropping the bridge future aborts them too.

use std::fmt;
use std::io;

use aztunnel_core::TunnelError;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Copy direction within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote stream to local connection.
    Inbound,
    /// Local connection to remote stream.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("remote->local"),
            Direction::Outbound => f.write_str("local->remote"),
        }
    }
}

/// Relay bytes between `local` and `remote` until either side finishes.
///
/// Returns once both endpoints have been released. I/O errors are logged
/// and end the session; they are never returned.
pub async fn bridge<L, R>(session_id: u64, local: L, remote: R)
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);
    let (done_tx, mut done_rx) = mpsc::channel::<(Direction, io::Result<u64>)>(2);

    let mut copies = JoinSet::new();
    {
        let done_tx = done_tx.clone();
        copies.spawn(async move {
            let result = copy_and_shutdown(&mut remote_rd, &mut local_wr).await;
            let _ = done_tx.send((Direction::Inbound, result)).await;
        });
    }
    copies.spawn(async move {
        let result = copy_and_shutdown(&mut local_rd, &mut remote_wr).await;
        let _ = done_tx.send((Direction::Outbound, result)).await;
    });

    match done_rx.recv().await {
        Some((direction, Ok(bytes))) => {
            debug!(session_id, %direction, bytes, "stream ended, closing session");
        }
        Some((direction, Err(e))) => {
            let err = TunnelError::SessionIo(e);
            warn!(session_id, %direction, error = %err, "closing session");
        }
        None => {
            warn!(session_id, "copy tasks ended without reporting");
        }
    }

    copies.shutdown().await;
    debug!(session_id, "session closed");
}

/// Copy until EOF, then signal EOF to the writer side.
async fn copy_and_shutdown<Rd, Wr>(reader: &mut Rd, writer: &mut Wr) -> io::Result<u64>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let bytes = tokio::io::copy(reader, writer).await?;
    writer.shutdown().await?;
    Ok(bytes)
}
