//! Named-secret persistence.
//!
//! Everything the client must remember across restarts (provisioning info,
//! session credentials) goes through a [`SecretStore`]. The store deals in
//! opaque strings; callers decide what the strings mean.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use dashmap::DashMap;
use vaultlink_wire::{Cryptographer, DefaultCryptographer, EncryptedValue};

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Stores `value` under `name`. An empty value removes the secret.
    async fn put(&self, name: &str, value: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;
}

pub type SharedSecretStore = Arc<dyn SecretStore>;

/// In-process store. State lives exactly as long as the process does.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: DashMap<String, String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(name).map(|entry| entry.value().clone()))
    }

    async fn put(&self, name: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.remove(name).await;
        }
        self.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.secrets.remove(name);
        Ok(())
    }
}

/// One encrypted file per secret under a directory the host controls.
///
/// Values are sealed with the host-supplied key before they touch disk, so a
/// copied file is useless without the key.
pub struct FileSecretStore {
    dir: PathBuf,
    key_material: String,
    crypto: Arc<dyn Cryptographer>,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>, key_material: impl Into<String>) -> Self {
        Self::with_cryptographer(dir, key_material, Arc::new(DefaultCryptographer))
    }

    pub fn with_cryptographer(
        dir: impl Into<PathBuf>,
        key_material: impl Into<String>,
        crypto: Arc<dyn Cryptographer>,
    ) -> Self {
        Self {
            dir: dir.into(),
            key_material: key_material.into(),
            crypto,
        }
    }

    /// Generates a fresh base64 key suitable for [`FileSecretStore::new`].
    /// The host is responsible for keeping it somewhere safer than the
    /// secrets directory.
    pub fn generate_key() -> String {
        let key: [u8; 32] = rand::random();
        B64.encode(key)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.secret"))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        let sealed: EncryptedValue =
            serde_json::from_str(&raw).with_context(|| format!("corrupt secret file {name}"))?;
        let value = self
            .crypto
            .decrypt(&self.key_material, &sealed)
            .with_context(|| format!("unsealing secret {name}"))?;
        Ok(Some(value))
    }

    async fn put(&self, name: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.remove(name).await;
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let sealed = self.crypto.encrypt(&self.key_material, value)?;
        let raw = serde_json::to_string(&sealed)?;
        tokio::fs::write(self.path_for(name), raw)
            .await
            .with_context(|| format!("writing secret {name}"))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing secret {name}")),
        }
    }
}
