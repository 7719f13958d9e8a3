//! Open-Ports Registry (§4.1): the authoritative, mutable record of which
//! `(protocol, port)` pairs this agent accepts dials for.
//!
//! Two independent maps, one per protocol, each guarded by its own mutex —
//! the two maps never need joint atomicity. A port entry's cancellation
//! token is shared with every dial session bound to that port, so removing
//! the entry cancels any in-flight sessions reading it.

use crate::scope::Scope;
use forwarder_core::{ForwarderError, ForwarderResult, PortsManifest, ProtoTag};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Called after every successful open or close, with a fresh snapshot of
/// the registry. Invoked on a single dedicated task, one call at a time, in
/// the order its snapshot was produced — never concurrently with itself.
pub type ChangeHook = Arc<dyn Fn(PortsManifest) + Send + Sync>;

struct ProtoMap {
    ports: Mutex<HashMap<u16, Scope>>,
}

impl ProtoMap {
    fn new() -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
        }
    }
}

/// Authoritative record of open ports, keyed by protocol.
pub struct OpenPortsRegistry {
    tcp: ProtoMap,
    udp: ProtoMap,
    broadcast_tx: mpsc::UnboundedSender<PortsManifest>,
}

impl OpenPortsRegistry {
    pub fn new(on_change: ChangeHook) -> Arc<Self> {
        // A single background task drains this channel and calls `on_change`
        // one snapshot at a time, in send order. `open_port`/`close` hand
        // snapshots to it by queuing rather than spawning a fresh task per
        // change, so two broadcasts in quick succession can never have
        // their `on_change` calls race each other and land out of order on
        // a subscriber's watch channel.
        let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel::<PortsManifest>();
        tokio::spawn(async move {
            while let Some(manifest) = broadcast_rx.recv().await {
                on_change(manifest);
            }
        });

        Arc::new(Self {
            tcp: ProtoMap::new(),
            udp: ProtoMap::new(),
            broadcast_tx,
        })
    }

    fn map_for(&self, proto: ProtoTag) -> &ProtoMap {
        match proto {
            ProtoTag::Tcp => &self.tcp,
            ProtoTag::Udp => &self.udp,
        }
    }

    /// Open a port for dialing. Fails if the port is already open for this
    /// protocol. On success, triggers a manifest broadcast.
    pub fn open_port(self: &Arc<Self>, proto: ProtoTag, port: u16) -> ForwarderResult<PortHandle> {
        let map = self.map_for(proto);
        let scope = {
            let mut ports = map.ports.lock().expect("registry mutex poisoned");
            if ports.contains_key(&port) {
                return Err(ForwarderError::PortAlreadyOpen { proto, port });
            }
            let scope = Scope::root();
            ports.insert(port, scope.clone());
            scope
        };

        self.trigger_broadcast();

        Ok(PortHandle {
            registry: self.clone(),
            proto,
            port,
            scope,
        })
    }

    /// Read-only lookup used by the dial handler to verify an incoming
    /// request and bind the session's lifetime to the port entry.
    pub fn lookup(&self, proto: ProtoTag, port: u16) -> Option<Scope> {
        self.map_for(proto)
            .ports
            .lock()
            .expect("registry mutex poisoned")
            .get(&port)
            .cloned()
    }

    /// Idempotent: returns `true` the first time a given port is removed,
    /// `false` on every call after.
    fn remove(&self, proto: ProtoTag, port: u16) -> bool {
        self.map_for(proto)
            .ports
            .lock()
            .expect("registry mutex poisoned")
            .remove(&port)
            .is_some()
    }

    pub fn snapshot(&self) -> PortsManifest {
        let tcp: Vec<u16> = self
            .tcp
            .ports
            .lock()
            .expect("registry mutex poisoned")
            .keys()
            .copied()
            .collect();
        let udp: Vec<u16> = self
            .udp
            .ports
            .lock()
            .expect("registry mutex poisoned")
            .keys()
            .copied()
            .collect();
        PortsManifest::new(tcp, udp)
    }

    /// Compute a snapshot and queue it for the background broadcast task —
    /// never inline, so a slow subscriber can never make `open_port`/`close`
    /// block (§5: mutex sections must not perform I/O or blocking sends).
    /// An unbounded send only enqueues; it never awaits the hook itself, and
    /// the single draining task is what keeps delivery order intact.
    fn trigger_broadcast(self: &Arc<Self>) {
        let snapshot = self.snapshot();
        // The receiver only drops if its task panicked; nothing left to
        // notify in that case.
        let _ = self.broadcast_tx.send(snapshot);
    }
}

/// Handle returned by [`OpenPortsRegistry::open_port`]. Invoking
/// [`PortHandle::close`] atomically removes the entry and cancels its
/// scope; idempotent.
pub struct PortHandle {
    registry: Arc<OpenPortsRegistry>,
    proto: ProtoTag,
    port: u16,
    scope: Scope,
}

impl PortHandle {
    pub fn proto(&self) -> ProtoTag {
        self.proto
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The scope bound to this port entry; cancelled when the entry is
    /// removed, either via `close` or because a peer-independent close
    /// happened elsewhere (there is no other path today, but dial sessions
    /// should bind to this scope rather than assume it lives forever).
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn close(&self) {
        if self.registry.remove(self.proto, self.port) {
            self.scope.cancel();
            self.registry.trigger_broadcast();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook() -> (ChangeHook, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        (
            Arc::new(move |_manifest| {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[tokio::test]
    async fn open_then_lookup_succeeds() {
        let (hook, _count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        let handle = registry.open_port(ProtoTag::Tcp, 8080).unwrap();
        assert_eq!(handle.port(), 8080);
        assert!(registry.lookup(ProtoTag::Tcp, 8080).is_some());
        assert!(registry.lookup(ProtoTag::Udp, 8080).is_none());
    }

    #[tokio::test]
    async fn duplicate_open_is_rejected() {
        let (hook, _count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        let _h = registry.open_port(ProtoTag::Tcp, 22).unwrap();
        let err = registry.open_port(ProtoTag::Tcp, 22).unwrap_err();
        assert!(matches!(err, ForwarderError::PortAlreadyOpen { port: 22, .. }));
    }

    #[tokio::test]
    async fn close_removes_entry_and_cancels_scope() {
        let (hook, _count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        let handle = registry.open_port(ProtoTag::Udp, 53).unwrap();
        let scope = handle.scope().clone();
        handle.close();
        assert!(registry.lookup(ProtoTag::Udp, 53).is_none());
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (hook, count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        let handle = registry.open_port(ProtoTag::Tcp, 100).unwrap();
        handle.close();
        handle.close();
        // let the background broadcast task drain the two queued snapshots
        // (open + first close)
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_then_close_restores_empty_snapshot() {
        let (hook, _count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        let before = registry.snapshot();
        let handle = registry.open_port(ProtoTag::Tcp, 7).unwrap();
        handle.close();
        assert_eq!(registry.snapshot(), before);
    }

    #[tokio::test]
    async fn boundary_ports_succeed() {
        let (hook, _count) = counting_hook();
        let registry = OpenPortsRegistry::new(hook);
        assert!(registry.open_port(ProtoTag::Tcp, 1).is_ok());
        assert!(registry.open_port(ProtoTag::Tcp, 65535).is_ok());
    }

    #[tokio::test]
    async fn rapid_successive_changes_are_delivered_in_order() {
        let seen: Arc<Mutex<Vec<PortsManifest>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let hook: ChangeHook = Arc::new(move |manifest| {
            recorded.lock().unwrap().push(manifest);
        });
        let registry = OpenPortsRegistry::new(hook);

        // open(7) then close() immediately: if broadcast dispatch ever
        // raced, the hook could see the empty-after-close manifest before
        // the one listing port 7.
        let handle = registry.open_port(ProtoTag::Tcp, 7).unwrap();
        handle.close();

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], PortsManifest::new(vec![7], vec![]));
        assert_eq!(seen[1], PortsManifest::new(vec![], vec![]));
    }
}
