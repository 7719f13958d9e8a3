//! The overlay host abstraction (§6): the external collaborator this crate
//! consumes instead of implementing NAT traversal, routing, multiplexed
//! secure transport, or peer discovery itself.
//!
//! Object-safe by construction — methods return boxed futures rather than
//! `async fn` in trait, the same tradeoff an abstract transport session
//! makes when it has to be used as a trait object across more than one
//! concrete backend.

use crate::error::ForwarderResult;
use crate::identity::PeerId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single bidirectional byte stream opened through the overlay, addressed
/// by peer identity and named protocol.
///
/// Supports both whole-object use (reading a small header, writing a small
/// header) and splitting into independent halves for full-duplex piping —
/// the same shape as [`tokio::net::TcpStream::into_split`], which is what
/// bidirectional copying against it requires: a blocking read on one half
/// must never stall a write on the other.
pub trait OverlayStream: Send {
    /// Read up to `buf.len()` bytes. Returns the number of bytes read, with
    /// `0` meaning EOF.
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>>;

    /// Write the entire buffer.
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>>;

    /// Close this stream (graceful EOF to the peer).
    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>>;

    /// Reset this stream: signal abort to the peer, distinct from a clean
    /// close. Used when a peer has violated the protocol (short header,
    /// unknown proto byte, unknown port).
    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>>;

    /// Split into an independent read half and write half for full-duplex
    /// piping.
    fn split(self: Box<Self>) -> (Box<dyn OverlayReadHalf>, Box<dyn OverlayWriteHalf>);
}

/// The read half of a split [`OverlayStream`].
pub trait OverlayReadHalf: Send {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>>;
}

/// The write half of a split [`OverlayStream`].
pub trait OverlayWriteHalf: Send {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>>;
    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>>;
    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>>;
}

/// Invoked once per inbound stream opened by a remote peer on a protocol
/// this host registered a handler for.
pub trait StreamHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        stream: Box<dyn OverlayStream>,
        remote: PeerId,
    ) -> BoxFuture<'a, ()>;
}

/// The overlay host dependency consumed by the core (§6). Implementations
/// wrap a concrete libp2p-style network; the core only ever talks to this
/// trait.
pub trait OverlayHost: Send + Sync {
    /// This host's own stable peer identity.
    fn local_peer_id(&self) -> &PeerId;

    /// Open a new bidirectional stream to `peer` on `protocol`.
    fn open<'a>(
        &'a self,
        peer: &'a PeerId,
        protocol: &'static str,
    ) -> BoxFuture<'a, ForwarderResult<Box<dyn OverlayStream>>>;

    /// Register a handler invoked for every inbound stream opened on
    /// `protocol`. Registering a second handler for the same protocol name
    /// replaces the first.
    fn register_handler(&self, protocol: &'static str, handler: Arc<dyn StreamHandler>);
}
