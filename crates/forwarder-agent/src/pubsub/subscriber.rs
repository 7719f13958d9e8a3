//! Ports pub/sub subscriber initiator (§4.5): opens a subscribe stream,
//! reads manifest frames off it, and hands each to the reconciler.

use crate::events::Events;
use crate::loopback::LoopbackPool;
use crate::reconciler;
use crate::scope::Scope;
use forwarder_core::error::ForwarderResult;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::OverlayHost;
use forwarder_core::protocol::{PORTSSUB_PROTOCOL, SUBSCRIBE};
use forwarder_core::wire::{ManifestFrameDecoder, PortsManifest};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;

/// Opens a subscription to `peer` and starts its reconciler and reader
/// tasks, all bound to a fresh child of `parent_scope`. Returns the
/// subscription's loopback listen address and its cancellation scope.
pub async fn subscribe(
    host: Arc<dyn OverlayHost>,
    loopback_pool: Arc<LoopbackPool>,
    peer: PeerId,
    parent_scope: &Scope,
    events: Events,
) -> ForwarderResult<(Ipv4Addr, Scope)> {
    let lease = loopback_pool.allocate()?;
    let listen_ip = lease.addr();
    let scope = parent_scope.child();

    let mut stream = host.open(&peer, PORTSSUB_PROTOCOL).await?;
    stream.write_all(&[SUBSCRIBE]).await?;

    let initial = PortsManifest::default();
    let (tx, rx) = watch::channel(initial);

    let reader_scope = scope.clone();
    let reader_events = events.clone();
    tokio::spawn(async move {
        run_frame_reader(reader_scope, stream, tx, reader_events).await;
    });

    let reconciler_scope = scope.clone();
    let reconciler_peer = peer.clone();
    tokio::spawn(async move {
        reconciler::run(reconciler_scope, host, listen_ip, reconciler_peer, rx, events).await;
    });

    // The leased address must outlive the subscription; release it only
    // once the subscription scope is torn down.
    let release_scope = scope.clone();
    tokio::spawn(async move {
        release_scope.cancelled().await;
        drop(lease);
    });

    Ok((listen_ip, scope))
}

async fn run_frame_reader(
    scope: Scope,
    mut stream: Box<dyn forwarder_core::overlay::OverlayStream>,
    tx: watch::Sender<PortsManifest>,
    events: Events,
) {
    let mut decoder = ManifestFrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = tokio::select! {
            _ = scope.cancelled() => break,
            result = stream.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    events.error(format!("portssub stream read error: {e}"));
                    break;
                }
            },
        };

        match decoder.feed(&buf[..n]) {
            Ok(manifests) => {
                for manifest in manifests {
                    if tx.send(manifest).is_err() {
                        // reconciler has ended; nothing left to feed.
                        scope.cancel();
                        return;
                    }
                }
            }
            Err(e) => {
                events.error(format!("portssub malformed frame: {e}"));
                break;
            }
        }
    }

    scope.cancel();
}
