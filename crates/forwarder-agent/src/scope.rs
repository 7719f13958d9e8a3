//! Cancellation scopes (§5): agent scope -> per-subscription scope ->
//! per-dial-session scope -> per-copy-direction scope. Cancelling any scope
//! interrupts I/O in its subtree, closes resources it owns, and every
//! spawned task in the subtree observes termination — `tokio_util`'s
//! [`CancellationToken`] already gives us exactly this linkage via
//! `child_token`, so `Scope` is a thin, named wrapper around it.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Scope(CancellationToken);

impl Scope {
    /// A fresh root scope (used for the agent scope).
    pub fn root() -> Self {
        Self(CancellationToken::new())
    }

    /// A child scope: cancelling `self` cancels the child, but cancelling
    /// the child does not propagate back up.
    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}
