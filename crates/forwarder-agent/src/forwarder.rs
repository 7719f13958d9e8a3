//! Agent API surface (§6): the thing a front-end actually holds. Wires the
//! dial handler and the pub/sub publisher onto an overlay host, and
//! exposes `open_port`/`connect` plus error/info sinks.

use crate::dial::DialHandler;
use crate::events::{EventSink, Events};
use crate::loopback::LoopbackPool;
use crate::pubsub::{self, Publisher};
use crate::registry::PortHandle;
use crate::scope::Scope;
use forwarder_core::error::{ForwarderError, ForwarderResult};
use forwarder_core::identity::{Keypair, PeerId};
use forwarder_core::overlay::OverlayHost;
use forwarder_core::protocol::{ProtoTag, DIAL_PROTOCOL, PORTSSUB_PROTOCOL};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// The running agent: one per process, one overlay identity. Outlives
/// every subscription and dial session it starts, which is why those only
/// ever hold an `Arc<dyn OverlayHost>` plus a peer id back to it rather
/// than a reference to the forwarder itself (§9, cyclic ownership).
pub struct Forwarder {
    host: Arc<dyn OverlayHost>,
    publisher: Arc<Publisher>,
    loopback_pool: Arc<LoopbackPool>,
    events: Events,
    agent_scope: Scope,
}

/// Tears down every subscription, dialer, and dial session started by this
/// forwarder, within bounded time (§8, shutdown scenario).
pub struct ShutdownHandle {
    agent_scope: Scope,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.agent_scope.cancel();
    }
}

/// Creates the agent: derives its peer identity from `keypair`, registers
/// both the dial and ports pub/sub stream handlers on `host`.
pub fn new_forwarder(keypair: &Keypair, host: Arc<dyn OverlayHost>) -> (Arc<Forwarder>, ShutdownHandle) {
    let events = Events::new();
    let derived = keypair.peer_id();
    if derived != *host.local_peer_id() {
        events.error(format!(
            "overlay host peer id {} does not match the keypair it was built from ({derived})",
            host.local_peer_id()
        ));
    }
    let publisher = Publisher::new(events.clone());
    let dial_handler = DialHandler::new(publisher.registry.clone(), events.clone());

    host.register_handler(DIAL_PROTOCOL, dial_handler);
    host.register_handler(PORTSSUB_PROTOCOL, publisher.clone());

    let agent_scope = Scope::root();
    let forwarder = Arc::new(Forwarder {
        host,
        publisher,
        loopback_pool: LoopbackPool::new(),
        events,
        agent_scope: agent_scope.clone(),
    });
    let shutdown = ShutdownHandle { agent_scope };
    (forwarder, shutdown)
}

impl Forwarder {
    pub fn id(&self) -> String {
        self.host.local_peer_id().to_string()
    }

    /// Open a local port for dialing (§4.1). Fails with `PortAlreadyOpen`
    /// if this protocol/port pair is already open.
    pub fn open_port(&self, proto: ProtoTag, port: u16) -> ForwarderResult<PortHandle> {
        self.publisher.registry.open_port(proto, port)
    }

    /// Subscribe to a remote peer's manifest and start reconciling local
    /// listeners against it. Returns the loopback IP the remote's ports
    /// appear on and a scope that tears the whole subscription down when
    /// cancelled.
    pub async fn connect(&self, peer_id: &str) -> ForwarderResult<(Ipv4Addr, Scope)> {
        let peer = decode_peer_id(peer_id)?;
        pubsub::subscribe(
            self.host.clone(),
            self.loopback_pool.clone(),
            peer,
            &self.agent_scope,
            self.events.clone(),
        )
        .await
    }

    /// Install a sink that receives only error events.
    pub fn on_error(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.events.set_sink(Arc::new(move |event| {
            if let crate::events::Event::Error(msg) = event {
                f(msg)
            }
        }));
    }

    /// Install a sink that receives only info events.
    pub fn on_info(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.events.set_sink(Arc::new(move |event| {
            if let crate::events::Event::Info(msg) = event {
                f(msg)
            }
        }));
    }

    /// Replace the event sink with one that receives every event,
    /// filtering on the [`crate::events::Event`] variant itself. Prefer
    /// this over calling both `on_error` and `on_info`, each of which
    /// replaces whatever sink came before it.
    pub fn on_event(&self, sink: EventSink) {
        self.events.set_sink(sink);
    }
}

fn decode_peer_id(raw: &str) -> ForwarderResult<PeerId> {
    PeerId::from_hex(raw).map_err(|_| ForwarderError::InvalidPeerId(raw.to_string()))
}
