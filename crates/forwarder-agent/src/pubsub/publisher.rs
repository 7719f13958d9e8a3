//! Ports pub/sub publisher handler (§4.5): accepts subscribe requests,
//! rejects duplicate peers, and forwards every registry change to each
//! subscriber until its stream ends.

use crate::events::Events;
use crate::registry::OpenPortsRegistry;
use forwarder_core::error::ForwarderResult;
use forwarder_core::identity::PeerId;
use forwarder_core::overlay::{OverlayStream, StreamHandler};
use forwarder_core::protocol::SUBSCRIBE;
use forwarder_core::wire::PortsManifest;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type SubscriberMap = Arc<Mutex<HashMap<PeerId, watch::Sender<PortsManifest>>>>;

/// Handler registered for the ports pub/sub protocol. Also owns the
/// [`OpenPortsRegistry`] so `open_port`/`close` can reach it directly.
pub struct Publisher {
    pub registry: Arc<OpenPortsRegistry>,
    subscribers: SubscriberMap,
    events: Events,
}

impl Publisher {
    pub fn new(events: Events) -> Arc<Self> {
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let broadcast_subscribers = subscribers.clone();
        let registry = OpenPortsRegistry::new(Arc::new(move |manifest: PortsManifest| {
            broadcast(&broadcast_subscribers, manifest);
        }));
        Arc::new(Self {
            registry,
            subscribers,
            events,
        })
    }
}

fn broadcast(subscribers: &SubscriberMap, manifest: PortsManifest) {
    let subscribers = subscribers.lock().expect("subscriber map poisoned");
    for tx in subscribers.values() {
        // No receiver (subscriber's forward loop has already exited) is
        // not an error here: its own handler task will notice the stream
        // ended and remove the entry.
        let _ = tx.send(manifest.clone());
    }
}

impl StreamHandler for Publisher {
    fn handle<'a>(&'a self, stream: Box<dyn OverlayStream>, remote: PeerId) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.handle_inner(stream, remote).await })
    }
}

impl Publisher {
    async fn handle_inner(&self, mut stream: Box<dyn OverlayStream>, remote: PeerId) {
        let mut control = [0u8; 1];
        let n = match stream.read(&mut control).await {
            Ok(n) => n,
            Err(e) => {
                self.events
                    .error(format!("portssub from {remote}: read failed: {e}"));
                let _ = stream.reset().await;
                return;
            }
        };
        if n != 1 || control[0] != SUBSCRIBE {
            self.events
                .error(format!("portssub from {remote}: not a subscribe request"));
            let _ = stream.reset().await;
            return;
        }

        let initial = self.registry.snapshot();
        let (tx, mut rx) = watch::channel(initial.clone());
        {
            let mut subscribers = self.subscribers.lock().expect("subscriber map poisoned");
            if subscribers.contains_key(&remote) {
                drop(subscribers);
                self.events
                    .error(format!("portssub from {remote}: duplicate subscription rejected"));
                let _ = stream.reset().await;
                return;
            }
            subscribers.insert(remote.clone(), tx);
        }

        if let Err(e) = stream.write_all(&initial.encode()).await {
            self.events
                .error(format!("portssub to {remote}: initial frame failed: {e}"));
            self.subscribers.lock().expect("subscriber map poisoned").remove(&remote);
            return;
        }

        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let manifest = rx.borrow_and_update().clone();
            if let Err(e) = stream.write_all(&manifest.encode()).await {
                self.events
                    .error(format!("portssub to {remote}: frame write failed: {e}"));
                break;
            }
        }

        self.subscribers.lock().expect("subscriber map poisoned").remove(&remote);
    }
}
