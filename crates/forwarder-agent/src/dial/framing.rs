//! UDP datagram framing (§4.2, §9): the overlay stream underneath a UDP
//! dial session is byte-oriented, so each datagram is carried as a
//! length-prefixed frame (`len:u16 BE | payload`) rather than the legacy
//! raw-append-and-hope-the-other-side's-read-size-lines-up behavior.

use forwarder_core::error::{ForwarderError, ForwarderResult};
use forwarder_core::overlay::{OverlayReadHalf, OverlayWriteHalf};

/// Reference read-buffer size for a single UDP datagram.
pub const UDP_MAX_DATAGRAM: usize = 1024;

pub async fn write_framed_half(
    write_half: &mut dyn OverlayWriteHalf,
    payload: &[u8],
) -> ForwarderResult<()> {
    let len = payload.len() as u16;
    write_half.write_all(&len.to_be_bytes()).await?;
    write_half.write_all(payload).await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the stream ended cleanly on a frame
/// boundary.
pub async fn read_framed_half(
    read_half: &mut dyn OverlayReadHalf,
) -> ForwarderResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    let filled = read_exact_half(read_half, &mut len_buf).await?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < len_buf.len() {
        return Err(ForwarderError::Other("truncated udp frame length".into()));
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    let filled = read_exact_half(read_half, &mut payload).await?;
    if filled != len {
        return Err(ForwarderError::Other("truncated udp frame payload".into()));
    }
    Ok(Some(payload))
}

async fn read_exact_half(
    read_half: &mut dyn OverlayReadHalf,
    buf: &mut [u8],
) -> ForwarderResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_half.read(&mut buf[filled..]).await?;
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
    use crate::testutil::duplex_overlay_stream;

    #[tokio::test]
    async fn round_trips_one_frame() {
        let (stream, _peer) = duplex_overlay_stream();
        let (mut read_half, mut write_half) = stream.split();
        write_framed_half(write_half.as_mut(), b"hello").await.unwrap();
        let frame = read_framed_half(read_half.as_mut()).await.unwrap();
        assert_eq!(frame, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn clean_eof_on_frame_boundary_yields_none() {
        let (stream, peer) = duplex_overlay_stream();
        let (mut read_half, _write_half) = stream.split();
        drop(peer);
        assert_eq!(read_framed_half(read_half.as_mut()).await.unwrap(), None);
    }
}
