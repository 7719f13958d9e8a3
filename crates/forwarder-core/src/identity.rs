//! Peer identity: an opaque byte string plus its string form for logging,
//! derived from an Ed25519 keypair.
//!
//! The keypair itself is supplied by the caller (§6: "Persisted state ...
//! is owned by the external key-management collaborator, not by the core").
//! This module only turns it into the self-certifying identifier the rest
//! of the crate addresses peers by.

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable, self-certifying identifier of a participant, derived from its
/// public key. Cheap to clone and to use as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Derive a peer ID from a raw Ed25519 public key.
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(public_key.as_bytes());
        Self(digest.to_vec())
    }

    /// Build a peer ID directly from already-derived bytes (e.g. received
    /// from the overlay, which hands back opaque peer IDs of its own).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse the hex string form produced by [`PeerId::to_string`].
    pub fn from_hex(s: &str) -> Result<Self, crate::error::ForwarderError> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| crate::error::ForwarderError::InvalidPeerId(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// The agent's own Ed25519 identity. Immutable after creation.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Generate a fresh keypair. Convenience for tests and first-run setup;
    /// production callers normally load a persisted key instead.
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_stable_for_same_key() {
        let kp = Keypair::generate();
        assert_eq!(kp.peer_id(), kp.peer_id());
    }

    #[test]
    fn peer_id_differs_across_keys() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn peer_id_hex_round_trips() {
        let kp = Keypair::generate();
        let id = kp.peer_id();
        let parsed = PeerId::from_hex(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn peer_id_hex_rejects_garbage() {
        assert!(PeerId::from_hex("not-hex!!").is_err());
    }
}
