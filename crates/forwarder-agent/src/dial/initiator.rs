//! Dial initiators (§4.2): the subscriber side of a dial session. Spawned
//! by the reconciler once per `(protocol, port)` entry in an active
//! manifest; lives and dies with its dialer scope.

use super::framing::{read_framed_half, write_framed_half, UDP_MAX_DATAGRAM};
use crate::events::Events;
use crate::pipe::pipe;
use crate::scope::Scope;
use forwarder_core::error::ForwarderResult;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::{OverlayHost, OverlayWriteHalf};
use forwarder_core::protocol::{ProtoTag, DIAL_PROTOCOL};
use forwarder_core::wire::DialHeader;
use rand::Rng;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;

const MAX_BIND_RETRIES: u32 = 4;

fn random_high_port() -> u16 {
    rand::thread_rng().gen_range(1024u16..=65534u16)
}

async fn bind_tcp_with_retry(ip: Ipv4Addr, port: u16, events: &Events) -> std::io::Result<TcpListener> {
    match TcpListener::bind((ip, port)).await {
        Ok(listener) => return Ok(listener),
        Err(e) => events.error(format!("tcp bind {ip}:{port} failed: {e}, retrying on a random port")),
    }
    let mut last_err = None;
    for attempt in 1..=MAX_BIND_RETRIES {
        let candidate = random_high_port();
        match TcpListener::bind((ip, candidate)).await {
            Ok(listener) => {
                events.info(format!("bound tcp {ip}:{candidate} after retry {attempt} (wanted {port})"));
                return Ok(listener);
            }
            Err(e) => {
                events.error(format!("tcp retry {attempt} on {ip}:{candidate} failed: {e}"));
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one retry attempted"))
}

async fn bind_udp_with_retry(ip: Ipv4Addr, port: u16, events: &Events) -> std::io::Result<UdpSocket> {
    match UdpSocket::bind((ip, port)).await {
        Ok(socket) => return Ok(socket),
        Err(e) => events.error(format!("udp bind {ip}:{port} failed: {e}, retrying on a random port")),
    }
    let mut last_err = None;
    for attempt in 1..=MAX_BIND_RETRIES {
        let candidate = random_high_port();
        match UdpSocket::bind((ip, candidate)).await {
            Ok(socket) => {
                events.info(format!("bound udp {ip}:{candidate} after retry {attempt} (wanted {port})"));
                return Ok(socket);
            }
            Err(e) => {
                events.error(format!("udp retry {attempt} on {ip}:{candidate} failed: {e}"));
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one retry attempted"))
}

/// Runs until `scope` is cancelled or binding fails after its retries.
pub async fn run_tcp_dialer(
    scope: Scope,
    host: Arc<dyn OverlayHost>,
    listen_ip: Ipv4Addr,
    port: u16,
    peer: PeerId,
    events: Events,
) {
    let listener = match bind_tcp_with_retry(listen_ip, port, &events).await {
        Ok(l) => l,
        Err(e) => {
            events.error(format!("giving up on tcp dialer for {peer} port {port}: {e}"));
            return;
        }
    };

    loop {
        let (conn, _addr) = tokio::select! {
            _ = scope.cancelled() => break,
            result = listener.accept() => match result {
                Ok(v) => v,
                Err(e) => {
                    events.error(format!("tcp accept error on {listen_ip}:{port}: {e}"));
                    continue;
                }
            },
        };

        let host = host.clone();
        let peer = peer.clone();
        let events = events.clone();
        let scope = scope.clone();
        tokio::spawn(async move {
            let mut stream = match host.open(&peer, DIAL_PROTOCOL).await {
                Ok(s) => s,
                Err(e) => {
                    events.error(format!("opening dial stream to {peer} for port {port} failed: {e}"));
                    return;
                }
            };
            let header = DialHeader::new(ProtoTag::Tcp, port).encode();
            if let Err(e) = stream.write_all(&header).await {
                events.error(format!("writing dial header to {peer} failed: {e}"));
                return;
            }
            pipe(&scope, conn, stream, &format!("dial-tcp:{peer}:{port}")).await;
        });
    }
}

/// Runs until `scope` is cancelled or binding fails after its retries.
/// Demultiplexes inbound datagrams by source address; see module docs on
/// [`crate::dial::framing`] for the wire shape used on the overlay side.
pub async fn run_udp_dialer(
    scope: Scope,
    host: Arc<dyn OverlayHost>,
    listen_ip: Ipv4Addr,
    port: u16,
    peer: PeerId,
    events: Events,
) {
    let socket = match bind_udp_with_retry(listen_ip, port, &events).await {
        Ok(s) => s,
        Err(e) => {
            events.error(format!("giving up on udp dialer for {peer} port {port}: {e}"));
            return;
        }
    };
    let socket = Arc::new(socket);
    let sources: Arc<Mutex<HashMap<SocketAddr, Box<dyn OverlayWriteHalf>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut buf = vec![0u8; UDP_MAX_DATAGRAM];

    loop {
        let (n, src) = tokio::select! {
            _ = scope.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(v) => v,
                Err(e) => {
                    events.error(format!("udp recv error on {listen_ip}:{port}: {e}"));
                    continue;
                }
            },
        };
        let payload = buf[..n].to_vec();

        let mut guard = sources.lock().await;
        if !guard.contains_key(&src) {
            drop(guard);
            let opened = open_udp_source(
                &host, &peer, port, &scope, &socket, &sources, src, &events,
            )
            .await;
            if !opened {
                continue;
            }
            guard = sources.lock().await;
        }

        if let Some(write_half) = guard.get_mut(&src) {
            if let Err(e) = write_framed_half(write_half.as_mut(), &payload).await {
                events.error(format!("udp source {src} write to {peer} failed: {e}"));
                guard.remove(&src);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn open_udp_source(
    host: &Arc<dyn OverlayHost>,
    peer: &PeerId,
    port: u16,
    scope: &Scope,
    socket: &Arc<UdpSocket>,
    sources: &Arc<Mutex<HashMap<SocketAddr, Box<dyn OverlayWriteHalf>>>>,
    src: SocketAddr,
    events: &Events,
) -> bool {
    let mut stream = match host.open(peer, DIAL_PROTOCOL).await {
        Ok(s) => s,
        Err(e) => {
            events.error(format!("opening udp dial stream to {peer} for {src} failed: {e}"));
            return false;
        }
    };
    let header = DialHeader::new(ProtoTag::Udp, port).encode();
    if let Err(e) = stream.write_all(&header).await {
        events.error(format!("writing udp dial header to {peer} failed: {e}"));
        return false;
    }

    let (read_half, write_half) = stream.split();
    sources.lock().await.insert(src, write_half);

    let child = scope.child();
    let socket = socket.clone();
    let sources = sources.clone();
    let events = events.clone();
    let peer = peer.clone();
    tokio::spawn(async move {
        run_udp_reply_reader(child, read_half, socket, src, sources, events, peer).await;
    });
    true
}

#[allow(clippy::too_many_arguments)]
async fn run_udp_reply_reader(
    scope: Scope,
    mut read_half: Box<dyn forwarder_core::overlay::OverlayReadHalf>,
    socket: Arc<UdpSocket>,
    src: SocketAddr,
    sources: Arc<Mutex<HashMap<SocketAddr, Box<dyn OverlayWriteHalf>>>>,
    events: Events,
    peer: PeerId,
) {
    loop {
        let payload: ForwarderResult<Option<Vec<u8>>> = tokio::select! {
            _ = scope.cancelled() => break,
            result = read_framed_half(read_half.as_mut()) => result,
        };
        match payload {
            Ok(Some(payload)) => {
                if let Err(e) = socket.send_to(&payload, src).await {
                    events.error(format!("udp reply to {src} from {peer} failed: {e}"));
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                events.error(format!("udp reply stream from {peer} for {src} errored: {e}"));
                break;
            }
        }
    }
    sources.lock().await.remove(&src);
}
