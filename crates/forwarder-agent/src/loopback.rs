//! Loopback IP allocation (§4.5, §6): one `127.0.89.N` address per active
//! subscription, `N` in `[1, 255]`.
//!
//! §9 leaves the release policy as an open question: the source never
//! reuses an address once handed out, capping the process at 255
//! subscriptions for its whole lifetime. This implementation takes the
//! free-list variant the design notes call strictly better — addresses
//! return to the pool when a subscription ends, so `MaxConnections` means
//! "255 *concurrent* subscriptions", matching the invariant in §8
//! ("loopback IPs are never reused concurrently") without also adopting
//! the source's permanent exhaustion.

use forwarder_core::error::{ForwarderError, ForwarderResult};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

const POOL_START: u8 = 1;
const POOL_END: u8 = 255;

/// Guards against the single counter mutex described in §5 becoming a
/// bottleneck elsewhere: allocation and release are the only operations,
/// both O(1).
pub struct LoopbackPool {
    free: Mutex<Vec<u8>>,
}

impl LoopbackPool {
    pub fn new() -> Arc<Self> {
        // Highest address first so `Vec::pop` hands out low addresses
        // first, keeping allocations predictable in tests.
        let free = (POOL_START..=POOL_END).rev().collect();
        Arc::new(Self {
            free: Mutex::new(free),
        })
    }

    /// A subscription's task lives on its own tokio task, so the lease it
    /// holds must be `'static` — hence an `Arc<Self>` receiver rather than
    /// a borrow.
    pub fn allocate(self: &Arc<Self>) -> ForwarderResult<LoopbackLease> {
        let mut free = self.free.lock().expect("loopback pool mutex poisoned");
        let octet = free.pop().ok_or(ForwarderError::MaxConnections)?;
        Ok(LoopbackLease {
            pool: self.clone(),
            octet,
        })
    }

    fn release(&self, octet: u8) {
        self.free.lock().expect("loopback pool mutex poisoned").push(octet);
    }
}

/// An allocated address; returns its octet to the pool on drop.
pub struct LoopbackLease {
    pool: Arc<LoopbackPool>,
    octet: u8,
}

impl LoopbackLease {
    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(127, 0, 89, self.octet)
    }
}

impl Drop for LoopbackLease {
    fn drop(&mut self) {
        self.pool.release(self.octet);
    }
}
