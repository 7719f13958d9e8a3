//! Subscriber reconciler (§4.6): diffs each manifest received against the
//! active per-port dialer set, starting new dialers and cancelling removed
//! ones. Reconciled independently per protocol — a port moving from TCP to
//! UDP between two manifests is seen as one port removed and one added,
//! never as a rename.

use crate::dial::{run_tcp_dialer, run_udp_dialer};
use crate::events::Events;
use crate::scope::Scope;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::OverlayHost;
use forwarder_core::protocol::ProtoTag;
use forwarder_core::wire::PortsManifest;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;

/// Runs until `scope` is cancelled or the manifest channel closes,
/// cancelling every active dialer on the way out.
pub async fn run(
    scope: Scope,
    host: Arc<dyn OverlayHost>,
    listen_ip: Ipv4Addr,
    peer: PeerId,
    mut manifest_rx: watch::Receiver<PortsManifest>,
    events: Events,
) {
    let mut dialers: HashMap<(ProtoTag, u16), Scope> = HashMap::new();

    let initial = manifest_rx.borrow_and_update().clone();
    reconcile_once(&scope, &host, listen_ip, &peer, &events, &mut dialers, &initial);

    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            changed = manifest_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let manifest = manifest_rx.borrow_and_update().clone();
                reconcile_once(&scope, &host, listen_ip, &peer, &events, &mut dialers, &manifest);
            }
        }
    }

    for (_, dialer_scope) in dialers.drain() {
        dialer_scope.cancel();
    }
}

fn reconcile_once(
    scope: &Scope,
    host: &Arc<dyn OverlayHost>,
    listen_ip: Ipv4Addr,
    peer: &PeerId,
    events: &Events,
    dialers: &mut HashMap<(ProtoTag, u16), Scope>,
    manifest: &PortsManifest,
) {
    let mut desired: HashSet<(ProtoTag, u16)> = HashSet::new();
    for &port in &manifest.tcp {
        desired.insert((ProtoTag::Tcp, port));
    }
    for &port in &manifest.udp {
        desired.insert((ProtoTag::Udp, port));
    }

    let to_remove: Vec<(ProtoTag, u16)> = dialers
        .keys()
        .filter(|key| !desired.contains(*key))
        .copied()
        .collect();
    for key in to_remove {
        if let Some(dialer_scope) = dialers.remove(&key) {
            dialer_scope.cancel();
        }
    }

    for key in desired {
        if dialers.contains_key(&key) {
            continue;
        }
        let (proto, port) = key;
        let dialer_scope = scope.child();
        dialers.insert(key, dialer_scope.clone());

        let host = host.clone();
        let peer = peer.clone();
        let events = events.clone();
        tokio::spawn(async move {
            match proto {
                ProtoTag::Tcp => run_tcp_dialer(dialer_scope, host, listen_ip, port, peer, events).await,
                ProtoTag::Udp => run_udp_dialer(dialer_scope, host, listen_ip, port, peer, events).await,
            }
        });
    }
}
