//! Pipe Engine (§4.3): bidirectional copy between a local kernel socket and
//! an overlay stream, with a single unified lifetime — both directions
//! stop as soon as either one fails or the parent scope is cancelled.

use crate::scope::Scope;
use forwarder_core::overlay::{OverlayReadHalf, OverlayStream, OverlayWriteHalf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Pipe `local` (a kernel socket: TCP stream or connected UDP wrapper)
/// against `remote` (one overlay stream) under `parent`. Does not return
/// until both directions have ended.
pub async fn pipe<L>(parent: &Scope, local: L, remote: Box<dyn OverlayStream>, label: &str)
where
    L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let child = parent.child();
    let (local_r, local_w) = tokio::io::split(local);
    let (remote_r, remote_w) = remote.split();

    let to_remote = copy_local_to_remote(child.clone(), local_r, remote_w, label.to_string());
    let to_local = copy_remote_to_local(child, remote_r, local_w, label.to_string());

    tokio::join!(to_remote, to_local);
}

async fn copy_local_to_remote<R>(
    scope: Scope,
    mut local_r: R,
    mut remote_w: Box<dyn OverlayWriteHalf>,
    label: String,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = tokio::select! {
            _ = scope.cancelled() => break,
            result = local_r.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(%label, error = %e, "local read error, ending pipe");
                    break;
                }
            },
        };
        if let Err(e) = remote_w.write_all(&buf[..n]).await {
            tracing::debug!(%label, error = %e, "remote write error, ending pipe");
            break;
        }
    }
    scope.cancel();
    let _ = remote_w.close().await;
}

async fn copy_remote_to_local<W>(
    scope: Scope,
    mut remote_r: Box<dyn OverlayReadHalf>,
    mut local_w: W,
    label: String,
) where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = tokio::select! {
            _ = scope.cancelled() => break,
            result = remote_r.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(%label, error = %e, "remote read error, ending pipe");
                    break;
                }
            },
        };
        if let Err(e) = local_w.write_all(&buf[..n]).await {
            tracing::debug!(%label, error = %e, "local write error, ending pipe");
            break;
        }
    }
    scope.cancel();
    let _ = local_w.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{duplex_local_pair, duplex_overlay_stream};
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn pipe_echoes_bytes_both_ways_and_ends_on_eof() {
        let scope = Scope::root();
        let (local, local_peer) = duplex_local_pair();
        let (remote_stream, mut remote_peer) = duplex_overlay_stream();

        let pipe_task = tokio::spawn(async move {
            pipe(&scope, local, remote_stream, "test").await;
        });

        let mut local_peer = local_peer;
        local_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        remote_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        remote_peer.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        local_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(local_peer);
        tokio::time::timeout(std::time::Duration::from_secs(2), pipe_task)
            .await
            .expect("pipe should end once the local side closes")
            .unwrap();
    }

    #[tokio::test]
    async fn pipe_ends_promptly_when_scope_is_cancelled() {
        let scope = Scope::root();
        let (local, _local_peer) = duplex_local_pair();
        let (remote_stream, _remote_peer) = duplex_overlay_stream();

        let cancel_scope = scope.clone();
        let pipe_task = tokio::spawn(async move {
            pipe(&scope, local, remote_stream, "test").await;
        });

        cancel_scope.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), pipe_task)
            .await
            .expect("pipe should end once its scope is cancelled")
            .unwrap();
    }
}
