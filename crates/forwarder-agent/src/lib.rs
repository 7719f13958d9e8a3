//! forwarder-agent: the dial protocol, the ports pub/sub protocol, and the
//! registry/reconciler machinery that ties them to a concrete overlay host.

pub mod dial;
pub mod events;
pub mod forwarder;
pub mod loopback;
pub mod pipe;
pub mod pubsub;
pub mod reconciler;
pub mod registry;
pub mod scope;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use events::{Event, EventSink, Events};
pub use forwarder::{new_forwarder, Forwarder, ShutdownHandle};
pub use registry::{ChangeHook, OpenPortsRegistry, PortHandle};
pub use scope::Scope;
