//! Ports manifest: a pair of ordered lists of open TCP/UDP ports (§3), and
//! its wire encoding as a length-prefixed frame (§4.5):
//!
//! ```text
//! frame := [ tcp_count:u16 BE | tcp_ports:(u16 BE)*tcp_count
//!          | udp_count:u16 BE | udp_ports:(u16 BE)*udp_count ]
//! ```
//!
//! A manifest is a complete snapshot, never a delta: monotone only
//! per-broadcast, as the spec puts it.

use crate::error::{ForwarderError, ForwarderResult};

/// Snapshot of a publisher's open ports, one broadcast's worth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortsManifest {
    pub tcp: Vec<u16>,
    pub udp: Vec<u16>,
}

impl PortsManifest {
    pub fn new(mut tcp: Vec<u16>, mut udp: Vec<u16>) -> Self {
        tcp.sort_unstable();
        udp.sort_unstable();
        Self { tcp, udp }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 2 * (self.tcp.len() + self.udp.len()));
        encode_ports(&mut out, &self.tcp);
        encode_ports(&mut out, &self.udp);
        out
    }

    /// Decode a single complete frame's payload (length prefix already
    /// stripped by a higher layer, or absent because the caller knows the
    /// bounds some other way).
    pub fn decode(buf: &[u8]) -> ForwarderResult<Self> {
        let mut cursor = Cursor { buf, pos: 0 };
        let tcp = decode_ports(&mut cursor)?;
        let udp = decode_ports(&mut cursor)?;
        Ok(Self { tcp, udp })
    }
}

fn encode_ports(out: &mut Vec<u8>, ports: &[u16]) {
    out.extend_from_slice(&(ports.len() as u16).to_be_bytes());
    for p in ports {
        out.extend_from_slice(&p.to_be_bytes());
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> ForwarderResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ForwarderError::Other("truncated manifest frame".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

fn decode_ports(cursor: &mut Cursor) -> ForwarderResult<Vec<u16>> {
    let count_bytes = cursor.take(2)?;
    let count = u16::from_be_bytes([count_bytes[0], count_bytes[1]]) as usize;
    let mut ports = Vec::with_capacity(count);
    for _ in 0..count {
        let b = cursor.take(2)?;
        ports.push(u16::from_be_bytes([b[0], b[1]]));
    }
    Ok(ports)
}

/// Streaming decoder: accumulates bytes off a publisher->subscriber stream
/// and yields every complete manifest frame it can assemble. Mirrors the
/// incremental-feed shape of a length-prefixed frame decoder, generalized
/// here to the manifest's two-length-prefix shape instead of a single
/// outer length prefix.
#[derive(Debug, Default)]
pub struct ManifestFrameDecoder {
    buffer: Vec<u8>,
}

impl ManifestFrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn feed(&mut self, data: &[u8]) -> ForwarderResult<Vec<PortsManifest>> {
        self.buffer.extend_from_slice(data);
        let mut manifests = Vec::new();

        loop {
            match Self::try_parse_one(&self.buffer) {
                Some((manifest, consumed)) => {
                    manifests.push(manifest);
                    self.buffer.drain(..consumed);
                }
                None => break,
            }
        }

        Ok(manifests)
    }

    fn try_parse_one(buf: &[u8]) -> Option<(PortsManifest, usize)> {
        if buf.len() < 2 {
            return None;
        }
        let tcp_count = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let after_tcp = 2 + tcp_count * 2;
        if buf.len() < after_tcp + 2 {
            return None;
        }
        let udp_count = u16::from_be_bytes([buf[after_tcp], buf[after_tcp + 1]]) as usize;
        let total = after_tcp + 2 + udp_count * 2;
        if buf.len() < total {
            return None;
        }
        let manifest = PortsManifest::decode(&buf[..total]).ok()?;
        Some((manifest, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_sorted() {
        let m = PortsManifest::new(vec![300, 100, 200], vec![9]);
        assert_eq!(m.tcp, vec![100, 200, 300]);
    }

    #[test]
    fn round_trips_single_frame() {
        let m = PortsManifest::new(vec![100, 200, 300], vec![9, 53]);
        let encoded = m.encode();
        let decoded = PortsManifest::decode(&encoded).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn round_trips_empty_manifest() {
        let m = PortsManifest::default();
        let decoded = PortsManifest::decode(&m.encode()).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn streaming_decoder_handles_multiple_frames() {
        let frames = vec![
            PortsManifest::new(vec![1], vec![]),
            PortsManifest::new(vec![], vec![2, 3]),
            PortsManifest::new(vec![7, 8], vec![9]),
        ];
        let mut combined = Vec::new();
        for f in &frames {
            combined.extend(f.encode());
        }

        let mut decoder = ManifestFrameDecoder::new();
        let decoded = decoder.feed(&combined).unwrap();
        assert_eq!(&decoded, &frames);
    }

    #[test]
    fn streaming_decoder_handles_byte_at_a_time_feed() {
        let frame = PortsManifest::new(vec![42, 43], vec![53]).encode();
        let mut decoder = ManifestFrameDecoder::new();
        let mut out = Vec::new();
        for byte in &frame {
            out.extend(decoder.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, vec![PortsManifest::new(vec![42, 43], vec![53])]);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(PortsManifest::decode(&[0x00]).is_err());
        assert!(PortsManifest::decode(&[0x00, 0x01, 0x00, 0x50]).is_err());
    }
}
