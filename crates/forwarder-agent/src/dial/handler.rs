//! Dial handler (§4.2): the publisher side of a dial session. Installed
//! once as the overlay's handler for the dial protocol; invoked per
//! inbound stream.

use super::framing::{read_framed_half, write_framed_half, UDP_MAX_DATAGRAM};
use crate::events::Events;
use crate::pipe::pipe;
use crate::registry::OpenPortsRegistry;
use crate::scope::Scope;
use forwarder_core::error::ForwarderResult;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::{OverlayStream, StreamHandler};
use forwarder_core::protocol::ProtoTag;
use forwarder_core::wire::{DialHeader, HEADER_LEN};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct DialHandler {
    registry: Arc<OpenPortsRegistry>,
    events: Events,
}

impl DialHandler {
    pub fn new(registry: Arc<OpenPortsRegistry>, events: Events) -> Arc<Self> {
        Arc::new(Self { registry, events })
    }
}

impl StreamHandler for DialHandler {
    fn handle<'a>(&'a self, stream: Box<dyn OverlayStream>, remote: PeerId) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.handle_inner(stream, remote).await })
    }
}

impl DialHandler {
    async fn handle_inner(&self, mut stream: Box<dyn OverlayStream>, remote: PeerId) {
        let mut header_buf = [0u8; HEADER_LEN];
        let filled = match read_exact_or_eof(stream.as_mut(), &mut header_buf).await {
            Ok(n) => n,
            Err(e) => {
                self.events
                    .error(format!("dial from {remote}: header read failed: {e}"));
                let _ = stream.reset().await;
                return;
            }
        };
        if filled != HEADER_LEN {
            self.events.error(format!(
                "dial from {remote}: short header ({filled} of {HEADER_LEN} bytes)"
            ));
            let _ = stream.reset().await;
            return;
        }

        let header = match DialHeader::decode(header_buf) {
            Ok(h) => h,
            Err(e) => {
                self.events
                    .error(format!("dial from {remote}: invalid header: {e}"));
                let _ = stream.reset().await;
                return;
            }
        };

        let Some(scope) = self.registry.lookup(header.proto, header.port) else {
            self.events.error(format!(
                "dial from {remote}: port {} not open for {}",
                header.port, header.proto
            ));
            let _ = stream.reset().await;
            return;
        };

        match header.proto {
            ProtoTag::Tcp => self.handle_tcp(stream, header.port, scope, remote).await,
            ProtoTag::Udp => self.handle_udp(stream, header.port, scope, remote).await,
        }
    }

    async fn handle_tcp(
        &self,
        mut stream: Box<dyn OverlayStream>,
        port: u16,
        scope: Scope,
        remote: PeerId,
    ) {
        let local = match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(s) => s,
            Err(e) => {
                self.events
                    .error(format!("dial from {remote}: connect to tcp 127.0.0.1:{port} failed: {e}"));
                let _ = stream.reset().await;
                return;
            }
        };
        pipe(&scope, local, stream, &format!("dial-tcp:{remote}:{port}")).await;
    }

    async fn handle_udp(
        &self,
        stream: Box<dyn OverlayStream>,
        port: u16,
        scope: Scope,
        remote: PeerId,
    ) {
        let socket = match connect_udp(port).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.events.error(format!(
                    "dial from {remote}: connect to udp 127.0.0.1:{port} failed: {e}"
                ));
                let mut stream = stream;
                let _ = stream.reset().await;
                return;
            }
        };

        let (mut read_half, mut write_half) = stream.split();
        let child = scope.child();
        let label = format!("dial-udp:{remote}:{port}");

        let to_service = {
            let child = child.clone();
            let socket = socket.clone();
            let label = label.clone();
            async move {
                loop {
                    let payload = tokio::select! {
                        _ = child.cancelled() => break,
                        result = read_framed_half(read_half.as_mut()) => match result {
                            Ok(Some(payload)) => payload,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::debug!(%label, error = %e, "udp stream read error");
                                break;
                            }
                        },
                    };
                    if let Err(e) = socket.send(&payload).await {
                        tracing::debug!(%label, error = %e, "udp service send error");
                        break;
                    }
                }
                child.cancel();
            }
        };

        let from_service = async move {
            let mut buf = vec![0u8; UDP_MAX_DATAGRAM];
            loop {
                let n = tokio::select! {
                    _ = child.cancelled() => break,
                    result = socket.recv(&mut buf) => match result {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::debug!(%label, error = %e, "udp service recv error");
                            break;
                        }
                    },
                };
                if let Err(e) = write_framed_half(write_half.as_mut(), &buf[..n]).await {
                    tracing::debug!(%label, error = %e, "udp stream write error");
                    break;
                }
            }
            child.cancel();
            let _ = write_half.close().await;
        };

        tokio::join!(to_service, from_service);
    }
}

async fn connect_udp(port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("127.0.0.1", 0)).await?;
    socket.connect(("127.0.0.1", port)).await?;
    Ok(socket)
}

/// Reads up to `buf.len()` bytes, stopping short only at EOF. Used for the
/// fixed 3-byte dial header, where a short read before EOF must be treated
/// as a protocol violation rather than silently retried.
async fn read_exact_or_eof(
    stream: &mut dyn OverlayStream,
    buf: &mut [u8],
) -> ForwarderResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OpenPortsRegistry;
    use crate::testutil::duplex_overlay_stream;
    use std::sync::Arc as StdArc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn no_op_events() -> Events {
        Events::new()
    }

    fn no_op_registry() -> StdArc<OpenPortsRegistry> {
        OpenPortsRegistry::new(StdArc::new(|_| {}))
    }

    #[tokio::test]
    async fn resets_on_short_header() {
        let registry = no_op_registry();
        let handler = DialHandler::new(registry, no_op_events());
        let (stream, mut peer) = duplex_overlay_stream();
        peer.write_all(&[0x00]).await.unwrap();
        drop(peer);
        handler
            .handle_inner(stream, PeerId::from_bytes(vec![1, 2, 3]))
            .await;
    }

    #[tokio::test]
    async fn resets_on_unknown_port() {
        let registry = no_op_registry();
        let handler = DialHandler::new(registry, no_op_events());
        let (stream, mut peer) = duplex_overlay_stream();
        let header = DialHeader::new(ProtoTag::Tcp, 9999).encode();
        peer.write_all(&header).await.unwrap();
        handler
            .handle_inner(stream, PeerId::from_bytes(vec![1, 2, 3]))
            .await;
        let mut buf = [0u8; 1];
        let n = peer.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0, "handler should close/reset the stream, not hang");
    }

    #[tokio::test]
    async fn pipes_tcp_dial_to_local_service() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let local_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(&buf).await.unwrap();
        });

        let registry = no_op_registry();
        let handle = registry.open_port(ProtoTag::Tcp, local_port).unwrap();
        let handler = DialHandler::new(registry, no_op_events());

        let (stream, mut peer) = duplex_overlay_stream();
        let header = DialHeader::new(ProtoTag::Tcp, local_port).encode();
        peer.write_all(&header).await.unwrap();

        let handler_task = tokio::spawn(async move {
            handler
                .handle_inner(stream, PeerId::from_bytes(vec![9]))
                .await;
        });

        peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(peer);
        tokio::time::timeout(std::time::Duration::from_secs(2), handler_task)
            .await
            .unwrap()
            .unwrap();
        handle.close();
    }
}
