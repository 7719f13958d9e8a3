//! In-process overlay double used by this crate's own tests (§8's
//! end-to-end scenarios exercise the real dial/pub-sub logic against this,
//! not a real libp2p network). Exported so the integration tests under
//! `tests/` can reach it too.

use forwarder_core::error::ForwarderResult;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::{
    OverlayHost, OverlayReadHalf, OverlayStream, OverlayWriteHalf, StreamHandler,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const DUPLEX_BUF: usize = 64 * 1024;

/// Wraps a `tokio::io::DuplexStream` end as an [`OverlayStream`].
pub struct DuplexOverlayStream(DuplexStream);

impl OverlayStream for DuplexOverlayStream {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>> {
        Box::pin(async move { Ok(self.0.read(buf).await?) })
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>> {
        Box::pin(async move {
            self.0.write_all(data).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        Box::pin(async move {
            self.0.shutdown().await?;
            Ok(())
        })
    }

    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        // The in-memory double has no distinct abort signal; closing is
        // the best approximation a real overlay's reset is not here.
        self.close()
    }

    fn split(self: Box<Self>) -> (Box<dyn OverlayReadHalf>, Box<dyn OverlayWriteHalf>) {
        let (r, w) = tokio::io::split(self.0);
        (Box::new(DuplexRead(r)), Box::new(DuplexWrite(w)))
    }
}

struct DuplexRead(ReadHalf<DuplexStream>);

impl OverlayReadHalf for DuplexRead {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>> {
        Box::pin(async move { Ok(self.0.read(buf).await?) })
    }
}

struct DuplexWrite(WriteHalf<DuplexStream>);

impl OverlayWriteHalf for DuplexWrite {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>> {
        Box::pin(async move {
            self.0.write_all(data).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        Box::pin(async move {
            self.0.shutdown().await?;
            Ok(())
        })
    }

    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        self.close()
    }
}

/// Build a fresh overlay-stream pair: one end as a boxed [`OverlayStream`]
/// (for code under test), the other as a raw [`DuplexStream`] a test can
/// read/write directly to assert on.
pub fn duplex_overlay_stream() -> (Box<dyn OverlayStream>, DuplexStream) {
    let (a, b) = tokio::io::duplex(DUPLEX_BUF);
    (Box::new(DuplexOverlayStream(a)), b)
}

/// A kernel-socket stand-in for tests that don't need a real TCP/UDP
/// endpoint, just something `AsyncRead + AsyncWrite`.
pub fn duplex_local_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(DUPLEX_BUF)
}

/// A shared in-process network: agents register handlers on it and open
/// streams to each other by peer id, exactly like real overlay peers
/// would, minus any actual networking.
pub struct MockNetwork {
    handlers: Mutex<HashMap<(PeerId, &'static str), Arc<dyn StreamHandler>>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
        })
    }

    pub fn agent(self: &Arc<Self>, peer_id: PeerId) -> Arc<MockOverlay> {
        Arc::new(MockOverlay {
            peer_id,
            network: self.clone(),
        })
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }
}

pub struct MockOverlay {
    peer_id: PeerId,
    network: Arc<MockNetwork>,
}

impl OverlayHost for MockOverlay {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn open<'a>(
        &'a self,
        peer: &'a PeerId,
        protocol: &'static str,
    ) -> BoxFuture<'a, ForwarderResult<Box<dyn OverlayStream>>> {
        Box::pin(async move {
            let handler = {
                let handlers = self.network.handlers.lock().expect("mock network poisoned");
                handlers.get(&(peer.clone(), protocol)).cloned()
            };
            let handler = handler.ok_or_else(|| {
                forwarder_core::error::ForwarderError::Transport(format!(
                    "no handler registered for {protocol} on {peer}"
                ))
            })?;

            let (a, b) = tokio::io::duplex(DUPLEX_BUF);
            let remote_id = self.peer_id.clone();
            tokio::spawn(async move {
                handler
                    .handle(Box::new(DuplexOverlayStream(b)), remote_id)
                    .await;
            });
            Ok(Box::new(DuplexOverlayStream(a)) as Box<dyn OverlayStream>)
        })
    }

    fn register_handler(&self, protocol: &'static str, handler: Arc<dyn StreamHandler>) {
        self.network
            .handlers
            .lock()
            .expect("mock network poisoned")
            .insert((self.peer_id.clone(), protocol), handler);
    }
}
