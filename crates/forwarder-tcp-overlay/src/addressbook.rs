//! Static peer address book: this overlay does no discovery or NAT
//! traversal of its own (§6, out of scope for the core), so every peer it
//! can reach must be registered here by its caller ahead of time.

use forwarder_core::identity::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct AddressBook(Arc<Mutex<HashMap<PeerId, SocketAddr>>>);

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer: PeerId, addr: SocketAddr) {
        self.0.lock().expect("address book poisoned").insert(peer, addr);
    }

    pub fn get(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.0.lock().expect("address book poisoned").get(peer).copied()
    }
}
