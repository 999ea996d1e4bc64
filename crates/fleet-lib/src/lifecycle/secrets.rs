//! Encrypted kubeconfig storage
//!
//! Kubeconfigs fetched from newly provisioned nodes are encrypted with
//! ChaCha20-Poly1305 before touching disk. The key is derived from the
//! configured passphrase; without one the material stays in memory only
//! and is lost on restart.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{FleetError, Result};

const NONCE_LEN: usize = 12;

/// Where a stored kubeconfig ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredAt {
    Disk(PathBuf),
    Memory,
}

pub struct SecretStore {
    key: Option<[u8; 32]>,
    state_dir: PathBuf,
    session: RwLock<Option<String>>,
}

impl SecretStore {
    pub fn new(passphrase: Option<&str>, state_dir: impl Into<PathBuf>) -> Self {
        let key = passphrase.map(derive_key);
        if key.is_none() {
            warn!("No encryption key configured; kubeconfigs will not be persisted");
        }
        Self {
            key,
            state_dir: state_dir.into(),
            session: RwLock::new(None),
        }
    }

    fn path(&self, cluster: &str) -> PathBuf {
        self.state_dir.join(format!("{}.kubeconfig.enc", cluster))
    }

    /// Persist a kubeconfig, encrypted, under the state directory. Falls
    /// back to the in-memory session slot when no key is configured.
    pub fn store_kubeconfig(&self, cluster: &str, kubeconfig: &str) -> Result<StoredAt> {
        let key = match self.key {
            Some(key) => key,
            None => {
                *self
                    .session
                    .write()
                    .map_err(|_| FleetError::internal("secret store lock poisoned"))? =
                    Some(kubeconfig.to_string());
                return Ok(StoredAt::Memory);
            }
        };

        let sealed = seal(&key, kubeconfig.as_bytes())?;
        std::fs::create_dir_all(&self.state_dir)?;
        let path = self.path(cluster);
        std::fs::write(&path, hex::encode(sealed))?;
        Ok(StoredAt::Disk(path))
    }

    /// Load and decrypt a previously stored kubeconfig.
    pub fn load_kubeconfig(&self, cluster: &str) -> Result<String> {
        let key = match self.key {
            Some(key) => key,
            None => {
                return self
                    .session
                    .read()
                    .map_err(|_| FleetError::internal("secret store lock poisoned"))?
                    .clone()
                    .ok_or_else(|| FleetError::not_found("kubeconfig", cluster));
            }
        };

        let path = self.path(cluster);
        if !path.exists() {
            return Err(FleetError::not_found("kubeconfig", cluster));
        }
        let encoded = std::fs::read_to_string(&path)?;
        let sealed = hex::decode(encoded.trim())
            .map_err(|e| FleetError::internal(format!("corrupt kubeconfig file: {}", e)))?;
        let plaintext = open(&key, &sealed)?;
        String::from_utf8(plaintext)
            .map_err(|e| FleetError::internal(format!("kubeconfig is not UTF-8: {}", e)))
    }
}

fn derive_key(passphrase: &str) -> [u8; 32] {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt with a fresh random nonce, prepended to the ciphertext.
fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| FleetError::internal("kubeconfig encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(FleetError::internal("sealed kubeconfig too short"));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| FleetError::internal("kubeconfig decryption failed, wrong key?"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters: []\n";

    #[test]
    fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(Some("passphrase"), dir.path());

        let stored = store.store_kubeconfig("fleet", KUBECONFIG).unwrap();
        assert!(matches!(stored, StoredAt::Disk(_)));

        let loaded = store.load_kubeconfig("fleet").unwrap();
        assert_eq!(loaded, KUBECONFIG);
    }

    #[test]
    fn test_on_disk_content_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(Some("passphrase"), dir.path());
        let path = match store.store_kubeconfig("fleet", KUBECONFIG).unwrap() {
            StoredAt::Disk(path) => path,
            StoredAt::Memory => panic!("expected disk storage"),
        };

        let raw = std::fs::read_to_string(path).unwrap();
        assert!(!raw.contains("apiVersion"));
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(Some("right"), dir.path());
        store.store_kubeconfig("fleet", KUBECONFIG).unwrap();

        let other = SecretStore::new(Some("wrong"), dir.path());
        assert!(other.load_kubeconfig("fleet").is_err());
    }

    #[test]
    fn test_memory_fallback_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(None, dir.path());

        let stored = store.store_kubeconfig("fleet", KUBECONFIG).unwrap();
        assert_eq!(stored, StoredAt::Memory);
        assert_eq!(store.load_kubeconfig("fleet").unwrap(), KUBECONFIG);
        // Nothing was written to disk
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretStore::new(Some("passphrase"), dir.path());
        let err = store.load_kubeconfig("fleet").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
