//! A demo [`OverlayHost`] backed by plain TCP: one connection per stream, a
//! four-byte handshake identifying protocol and sender, and a static
//! [`AddressBook`] in place of peer discovery.

use crate::addressbook::AddressBook;
use crate::stream::TcpOverlayStream;
use forwarder_core::error::{ForwarderError, ForwarderResult};
use forwarder_core::identity::{Keypair, PeerId};
use forwarder_core::overlay::{OverlayHost, OverlayStream, StreamHandler};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The host's own identity plus everything an accept loop needs to route
/// an inbound connection to the right registered handler.
pub struct TcpOverlayHost {
    local_peer_id: PeerId,
    addresses: AddressBook,
    handlers: Mutex<HashMap<&'static str, Arc<dyn StreamHandler>>>,
}

impl TcpOverlayHost {
    /// Binds `listen_addr` and starts accepting connections in the
    /// background. The returned handle is what the agent registers stream
    /// handlers on and dials peers through.
    pub async fn bind(
        keypair: &Keypair,
        listen_addr: SocketAddr,
        addresses: AddressBook,
    ) -> ForwarderResult<Arc<Self>> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(ForwarderError::from)?;

        let host = Arc::new(Self {
            local_peer_id: keypair.peer_id(),
            addresses,
            handlers: Mutex::new(HashMap::new()),
        });

        let accept_host = host.clone();
        tokio::spawn(async move {
            accept_loop(accept_host, listener).await;
        });

        Ok(host)
    }

    fn handler_for(&self, protocol: &str) -> Option<Arc<dyn StreamHandler>> {
        self.handlers
            .lock()
            .expect("handler map poisoned")
            .get(protocol)
            .cloned()
    }
}

impl OverlayHost for TcpOverlayHost {
    fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    fn open<'a>(
        &'a self,
        peer: &'a PeerId,
        protocol: &'static str,
    ) -> BoxFuture<'a, ForwarderResult<Box<dyn OverlayStream>>> {
        Box::pin(async move {
            let addr = self.addresses.get(peer).ok_or_else(|| {
                ForwarderError::Transport(format!("no known address for peer {peer}"))
            })?;
            let mut socket = TcpStream::connect(addr).await.map_err(ForwarderError::from)?;
            write_handshake(&mut socket, protocol, &self.local_peer_id).await?;
            Ok(Box::new(TcpOverlayStream(socket)) as Box<dyn OverlayStream>)
        })
    }

    fn register_handler(&self, protocol: &'static str, handler: Arc<dyn StreamHandler>) {
        self.handlers
            .lock()
            .expect("handler map poisoned")
            .insert(protocol, handler);
    }
}

async fn accept_loop(host: Arc<TcpOverlayHost>, listener: TcpListener) {
    loop {
        let (mut socket, remote_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "tcp overlay accept failed");
                continue;
            }
        };
        let host = host.clone();
        tokio::spawn(async move {
            let (protocol, remote_peer) = match read_handshake(&mut socket).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(%remote_addr, error = %e, "tcp overlay handshake failed");
                    return;
                }
            };
            let Some(handler) = host.handler_for(&protocol) else {
                warn!(%remote_addr, %protocol, "no handler registered for protocol");
                return;
            };
            debug!(%remote_addr, %protocol, peer = %remote_peer, "tcp overlay stream accepted");
            handler
                .handle(Box::new(TcpOverlayStream(socket)), remote_peer)
                .await;
        });
    }
}

async fn write_handshake(
    socket: &mut TcpStream,
    protocol: &str,
    local: &PeerId,
) -> ForwarderResult<()> {
    let proto_bytes = protocol.as_bytes();
    let peer_bytes = local.as_bytes();
    let mut frame = Vec::with_capacity(2 + proto_bytes.len() + peer_bytes.len());
    frame.push(proto_bytes.len() as u8);
    frame.extend_from_slice(proto_bytes);
    frame.push(peer_bytes.len() as u8);
    frame.extend_from_slice(peer_bytes);
    socket.write_all(&frame).await.map_err(ForwarderError::from)
}

async fn read_handshake(socket: &mut TcpStream) -> ForwarderResult<(String, PeerId)> {
    let proto_len = read_u8(socket).await? as usize;
    let protocol = read_exact_string(socket, proto_len).await?;
    let peer_len = read_u8(socket).await? as usize;
    let mut peer_bytes = vec![0u8; peer_len];
    socket.read_exact(&mut peer_bytes).await.map_err(ForwarderError::from)?;
    Ok((protocol, PeerId::from_bytes(peer_bytes)))
}

async fn read_u8(socket: &mut TcpStream) -> ForwarderResult<u8> {
    let mut b = [0u8; 1];
    socket.read_exact(&mut b).await.map_err(ForwarderError::from)?;
    Ok(b[0])
}

async fn read_exact_string(socket: &mut TcpStream, len: usize) -> ForwarderResult<String> {
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await.map_err(ForwarderError::from)?;
    String::from_utf8(buf).map_err(|e| ForwarderError::Transport(e.to_string()))
}
