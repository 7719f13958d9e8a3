//! Process-wide error/info event sinks, but installed explicitly on the
//! forwarder rather than as global mutable state (§9: "Replace with an
//! explicit sink passed to `new_forwarder`, or a tagged event channel the
//! front-end drains; avoid process-global mutable state in the rewrite").

use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// An operational event: no error is fatal to the agent (§7), so this is
/// purely informational for whatever front-end installed the sink.
#[derive(Debug, Clone)]
pub enum Event {
    Info(String),
    Error(String),
}

pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

fn default_sink() -> EventSink {
    Arc::new(|event| match event {
        Event::Info(msg) => info!("{msg}"),
        Event::Error(msg) => error!("{msg}"),
    })
}

/// Holds the currently installed sink; swappable at runtime via
/// [`Events::on_error`]/[`Events::on_info`], each of which replaces the
/// combined sink with one that filters by variant.
#[derive(Clone)]
pub struct Events {
    sink: Arc<RwLock<EventSink>>,
}

impl Events {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(RwLock::new(default_sink())),
        }
    }

    pub fn emit(&self, event: Event) {
        (self.sink.read().expect("event sink lock poisoned"))(event);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.emit(Event::Info(msg.into()));
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.emit(Event::Error(msg.into()));
    }

    /// Install a sink that receives every event (error and info alike).
    /// Front-ends that want separate `on_error`/`on_info` callbacks can
    /// filter on the `Event` variant inside the closure.
    pub fn set_sink(&self, sink: EventSink) {
        *self.sink.write().expect("event sink lock poisoned") = sink;
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
