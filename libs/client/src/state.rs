//! Persisted session state.
//!
//! One JSON blob under a fixed secret name holds everything that survives a
//! restart. All mutation goes through [`SessionState`], which writes the blob
//! back under the same lock that applied the change, so the store never sees
//! a half-applied update.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::secrets::SharedSecretStore;

/// Secret name the state blob is stored under.
pub const STATE_SECRET_NAME: &str = "vaultlink-client-state";

/// Identity of this installation as registered with the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningInfo {
    #[serde(default)]
    pub app_instance_id: Option<Uuid>,
    /// Key material for signing session-bootstrap calls.
    #[serde(default)]
    pub app_shared_secret: String,
    /// Token the shell needs to finish interactive sign-up. Empty for
    /// federated registrations.
    #[serde(default)]
    pub app_creation_token: String,
}

impl ProvisioningInfo {
    pub fn is_valid(&self) -> bool {
        self.app_instance_id.is_some() && !self.app_shared_secret.is_empty()
    }
}

/// A live session token plus the shared secret requests are signed with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub token: String,
    pub shared_secret: String,
}

impl SessionCredential {
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.shared_secret.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub provisioning: Option<ProvisioningInfo>,
    #[serde(default)]
    pub credential: Option<SessionCredential>,
    #[serde(default)]
    pub online_token: Option<String>,
    /// Set once the server has confirmed the provisioning info this run.
    /// Deliberately not persisted; every process start re-verifies.
    #[serde(skip)]
    pub provisioning_confirmed: bool,
}

impl ClientState {
    pub fn has_provisioning_info(&self) -> bool {
        self.provisioning
            .as_ref()
            .is_some_and(ProvisioningInfo::is_valid)
    }

    pub fn has_credentials(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(SessionCredential::is_valid)
    }

    pub fn has_online_token(&self) -> bool {
        self.online_token.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// The single writer for [`ClientState`].
pub struct SessionState {
    store: SharedSecretStore,
    state: Mutex<ClientState>,
}

impl SessionState {
    /// Loads state from the store. A missing, unreadable, or corrupt blob
    /// yields a fresh default; loading never fails.
    pub async fn load(store: SharedSecretStore) -> Self {
        let state = match store.get(STATE_SECRET_NAME).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!(error = %err, "stored client state is corrupt; starting fresh");
                    ClientState::default()
                }
            },
            Ok(None) => ClientState::default(),
            Err(err) => {
                warn!(error = %err, "secret store read failed; starting fresh");
                ClientState::default()
            }
        };
        Self {
            store,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> ClientState {
        self.state.lock().await.clone()
    }

    pub async fn has_provisioning_info(&self) -> bool {
        self.state.lock().await.has_provisioning_info()
    }

    pub async fn has_credentials(&self) -> bool {
        self.state.lock().await.has_credentials()
    }

    pub async fn provisioning(&self) -> Option<ProvisioningInfo> {
        self.state.lock().await.provisioning.clone()
    }

    pub async fn credential(&self) -> Option<SessionCredential> {
        self.state.lock().await.credential.clone()
    }

    pub async fn online_token(&self) -> Option<String> {
        self.state.lock().await.online_token.clone()
    }

    pub async fn is_provisioning_confirmed(&self) -> bool {
        self.state.lock().await.provisioning_confirmed
    }

    pub async fn mark_provisioning_confirmed(&self) {
        self.state.lock().await.provisioning_confirmed = true;
    }

    /// Applies `mutate` and persists the result before releasing the lock.
    pub async fn update<F>(&self, mutate: F) -> VaultResult<()>
    where
        F: FnOnce(&mut ClientState),
    {
        let mut state = self.state.lock().await;
        mutate(&mut state);
        self.persist(&state).await
    }

    pub async fn set_provisioning(&self, info: Option<ProvisioningInfo>) -> VaultResult<()> {
        self.update(|state| state.provisioning = info).await
    }

    pub async fn set_credential(&self, credential: Option<SessionCredential>) -> VaultResult<()> {
        self.update(|state| state.credential = credential).await
    }

    pub async fn set_online_token(&self, token: Option<String>) -> VaultResult<()> {
        self.update(|state| state.online_token = token).await
    }

    /// Drops the provisioning identity and everything derived from it. Used
    /// when the server reports the app instance no longer exists.
    pub async fn clear_provisioning(&self) -> VaultResult<()> {
        self.update(|state| {
            state.provisioning = None;
            state.credential = None;
            state.online_token = None;
            state.provisioning_confirmed = false;
        })
        .await
    }

    /// Wipes state in memory and in the store.
    pub async fn reset(&self) -> VaultResult<()> {
        let mut state = self.state.lock().await;
        *state = ClientState::default();
        self.store
            .remove(STATE_SECRET_NAME)
            .await
            .map_err(VaultError::Storage)
    }

    async fn persist(&self, state: &ClientState) -> VaultResult<()> {
        let raw = serde_json::to_string(state).map_err(|err| VaultError::Storage(err.into()))?;
        self.store
            .put(STATE_SECRET_NAME, &raw)
            .await
            .map_err(VaultError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::secrets::{MemorySecretStore, SecretStore};

    fn store() -> SharedSecretStore {
        Arc::new(MemorySecretStore::new())
    }

    fn provisioning() -> ProvisioningInfo {
        ProvisioningInfo {
            app_instance_id: Some(Uuid::new_v4()),
            app_shared_secret: "c2VjcmV0".into(),
            app_creation_token: "tok".into(),
        }
    }

    #[tokio::test]
    async fn missing_blob_loads_default() {
        let state = SessionState::load(store()).await;
        assert!(!state.has_provisioning_info().await);
        assert!(!state.has_credentials().await);
    }

    #[tokio::test]
    async fn corrupt_blob_loads_default() {
        let store = store();
        store.put(STATE_SECRET_NAME, "{not json").await.unwrap();
        let state = SessionState::load(store).await;
        assert!(!state.has_provisioning_info().await);
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let store = store();
        let state = SessionState::load(store.clone()).await;
        let info = provisioning();
        state.set_provisioning(Some(info.clone())).await.unwrap();
        state
            .set_credential(Some(SessionCredential {
                token: "t".into(),
                shared_secret: "s".into(),
            }))
            .await
            .unwrap();

        let reloaded = SessionState::load(store).await;
        assert_eq!(reloaded.provisioning().await, Some(info));
        assert!(reloaded.has_credentials().await);
    }

    #[tokio::test]
    async fn confirmation_flag_is_not_persisted() {
        let store = store();
        let state = SessionState::load(store.clone()).await;
        state.set_provisioning(Some(provisioning())).await.unwrap();
        state.mark_provisioning_confirmed().await;
        assert!(state.is_provisioning_confirmed().await);

        let reloaded = SessionState::load(store).await;
        assert!(!reloaded.is_provisioning_confirmed().await);
        assert!(reloaded.has_provisioning_info().await);
    }

    #[tokio::test]
    async fn clear_provisioning_drops_derived_state() {
        let state = SessionState::load(store()).await;
        state.set_provisioning(Some(provisioning())).await.unwrap();
        state
            .set_credential(Some(SessionCredential {
                token: "t".into(),
                shared_secret: "s".into(),
            }))
            .await
            .unwrap();
        state.set_online_token(Some("online".into())).await.unwrap();

        state.clear_provisioning().await.unwrap();
        let snapshot = state.snapshot().await;
        assert!(snapshot.provisioning.is_none());
        assert!(snapshot.credential.is_none());
        assert!(snapshot.online_token.is_none());
    }

    #[tokio::test]
    async fn reset_clears_store() {
        let store = store();
        let state = SessionState::load(store.clone()).await;
        state.set_provisioning(Some(provisioning())).await.unwrap();
        state.reset().await.unwrap();

        assert!(!state.has_provisioning_info().await);
        assert_eq!(store.get(STATE_SECRET_NAME).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_provisioning_does_not_count() {
        let state = SessionState::load(store()).await;
        state
            .set_provisioning(Some(ProvisioningInfo {
                app_instance_id: Some(Uuid::new_v4()),
                app_shared_secret: String::new(),
                app_creation_token: String::new(),
            }))
            .await
            .unwrap();
        assert!(!state.has_provisioning_info().await);
    }
}
