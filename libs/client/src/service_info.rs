//! Service topology: which instance this installation talks to.
//!
//! Accounts live on exactly one service instance. The pair of URLs for that
//! instance is cached on disk so later runs start against the right one
//! without a topology query.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{VaultError, VaultResult};

/// The endpoints the client currently routes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_url: Url,
    pub shell_url: Url,
}

/// One instance from the service's published topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub service_url: Url,
    pub shell_url: Url,
}

/// The full published topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub instances: Vec<ServiceInstance>,
}

impl ServiceDefinition {
    /// Instance ids compare case-insensitively; the shell is not consistent
    /// about casing in redirects.
    pub fn find_instance(&self, id: &str) -> Option<&ServiceInstance> {
        self.instances
            .iter()
            .find(|instance| instance.id.eq_ignore_ascii_case(id))
    }
}

/// On-disk cache for [`ServiceInfo`].
pub struct ServiceInfoCache {
    path: PathBuf,
}

impl ServiceInfoCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the cached routing info, or `None` when the file is missing
    /// or unreadable. A bad cache never blocks startup.
    pub async fn load(&self) -> Option<ServiceInfo> {
        let raw = tokio::fs::read_to_string(&self.path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "service info cache is corrupt");
                None
            }
        }
    }

    pub async fn save(&self, info: &ServiceInfo) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| VaultError::Storage(err.into()))?;
        }
        let raw =
            serde_json::to_string_pretty(info).map_err(|err| VaultError::Storage(err.into()))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|err| VaultError::Storage(err.into()))
    }
}
