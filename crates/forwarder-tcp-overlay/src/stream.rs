//! [`OverlayStream`] over one raw TCP connection. No multiplexing: every
//! stream this host opens or accepts is its own socket, the same "one
//! connection per logical stream" tradeoff `websocket.rs`'s teacher
//! equivalent avoids but a bare TCP overlay has no cheaper option for.

use forwarder_core::error::{ForwarderError, ForwarderResult};
use forwarder_core::overlay::{OverlayReadHalf, OverlayStream, OverlayWriteHalf};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct TcpOverlayStream(pub TcpStream);

impl OverlayStream for TcpOverlayStream {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>> {
        Box::pin(async move { self.0.read(buf).await.map_err(ForwarderError::from) })
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>> {
        Box::pin(async move { self.0.write_all(data).await.map_err(ForwarderError::from) })
    }

    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        Box::pin(async move { self.0.shutdown().await.map_err(ForwarderError::from) })
    }

    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        // TCP has no distinct abort signal short of a kernel RST, which
        // `set_linger(Some(Duration::ZERO))` approximates on drop; a plain
        // shutdown is the closest we can do without ending the connection
        // mid-method.
        Box::pin(async move { self.0.shutdown().await.map_err(ForwarderError::from) })
    }

    fn split(self: Box<Self>) -> (Box<dyn OverlayReadHalf>, Box<dyn OverlayWriteHalf>) {
        let (read, write) = tokio::io::split(self.0);
        (Box::new(TcpReadHalf(read)), Box::new(TcpWriteHalf(write)))
    }
}

struct TcpReadHalf(ReadHalf<TcpStream>);

impl OverlayReadHalf for TcpReadHalf {
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, ForwarderResult<usize>> {
        Box::pin(async move { self.0.read(buf).await.map_err(ForwarderError::from) })
    }
}

struct TcpWriteHalf(WriteHalf<TcpStream>);

impl OverlayWriteHalf for TcpWriteHalf {
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, ForwarderResult<()>> {
        Box::pin(async move { self.0.write_all(data).await.map_err(ForwarderError::from) })
    }

    fn close(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        Box::pin(async move { self.0.shutdown().await.map_err(ForwarderError::from) })
    }

    fn reset(&mut self) -> BoxFuture<'_, ForwarderResult<()>> {
        Box::pin(async move { self.0.shutdown().await.map_err(ForwarderError::from) })
    }
}
