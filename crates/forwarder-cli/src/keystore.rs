//! Persisted identity: a single Ed25519 secret key file, hex-encoded like
//! every other identifier this crate prints — peer ids are hex strings too,
//! so the identity file uses the same alphabet rather than introducing a
//! second encoding just for this one file.

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use forwarder_core::identity::Keypair;
use std::path::{Path, PathBuf};

pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_location() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".p2pforwarder")
            .join("identity")
    }

    /// Load the persisted key, generating and persisting a fresh one on
    /// first run.
    pub fn load_or_generate(&self) -> Result<Keypair> {
        if self.path.exists() {
            self.load()
        } else {
            let keypair = Keypair::generate();
            self.save(&keypair)?;
            Ok(keypair)
        }
    }

    pub fn load(&self) -> Result<Keypair> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read identity at {}", self.path.display()))?;
        let bytes = hex::decode(content.trim())
            .with_context(|| format!("identity at {} is not valid hex", self.path.display()))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            anyhow::anyhow!("identity at {} is not a 32-byte key", self.path.display())
        })?;
        Ok(Keypair::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    /// Generate a fresh identity. Refuses to overwrite an existing one.
    pub fn generate(&self) -> Result<Keypair> {
        if self.path.exists() {
            anyhow::bail!(
                "identity already exists at {}; remove it first if you want a new one",
                self.path.display()
            );
        }
        let keypair = Keypair::generate();
        self.save(&keypair)?;
        Ok(keypair)
    }

    fn save(&self, keypair: &Keypair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let encoded = hex::encode(keypair.signing_key().to_bytes());
        std::fs::write(&self.path, encoded)
            .with_context(|| format!("failed to write identity to {}", self.path.display()))?;
        set_restrictive_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_restrictive_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
