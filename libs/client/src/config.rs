use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;
use uuid::Uuid;

/// Default cap on logical attempts per request, counting the first send.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-request transport timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client proves who the user is.
///
/// `Interactive` sends the user through the service's web front end once and
/// then runs on the session token alone. `Federated` never shows UI; identity
/// tickets minted elsewhere are exchanged for online tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthModel {
    #[default]
    Interactive,
    Federated,
}

/// Which tokens to refresh when the server reports an auth-expiry status.
///
/// `Matching` refreshes only the token the status names. `Both` refreshes the
/// session token and the online token together on either status, for servers
/// that invalidate them as a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenRefreshStrategy {
    #[default]
    Matching,
    Both,
}

/// Identity of this application installation.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    /// The master application id registered with the service. Instance ids
    /// are minted per installation underneath it.
    pub master_app_id: Uuid,
    /// Human-readable name shown on the authorization page.
    pub instance_name: String,
    /// Culture code stamped into request headers. `None` means the builder
    /// default.
    pub culture_code: Option<String>,
    /// Whether this installation may be authorized against multiple records.
    pub multi_record: bool,
}

impl AppIdentity {
    pub fn new(master_app_id: Uuid, instance_name: impl Into<String>) -> Self {
        Self {
            master_app_id,
            instance_name: instance_name.into(),
            culture_code: None,
            multi_record: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub identity: AppIdentity,
    /// Bootstrap RPC endpoint. Superseded at runtime by the instance the
    /// user's account lives on.
    pub service_url: Url,
    /// Bootstrap shell (web front end) base URL.
    pub shell_url: Url,
    pub auth_model: AuthModel,
    pub refresh_strategy: TokenRefreshStrategy,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(identity: AppIdentity, service_url: Url, shell_url: Url) -> Self {
        Self {
            identity,
            service_url,
            shell_url,
            auth_model: AuthModel::default(),
            refresh_strategy: TokenRefreshStrategy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Reads configuration from `VAULTLINK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let master_app_id = required_env("VAULTLINK_MASTER_APP_ID")?
            .parse::<Uuid>()
            .context("VAULTLINK_MASTER_APP_ID is not a uuid")?;
        let instance_name =
            env::var("VAULTLINK_INSTANCE_NAME").unwrap_or_else(|_| "vaultlink".into());
        let service_url = required_env("VAULTLINK_SERVICE_URL")?
            .parse::<Url>()
            .context("VAULTLINK_SERVICE_URL is not a url")?;
        let shell_url = required_env("VAULTLINK_SHELL_URL")?
            .parse::<Url>()
            .context("VAULTLINK_SHELL_URL is not a url")?;

        let mut identity = AppIdentity::new(master_app_id, instance_name);
        identity.culture_code = env::var("VAULTLINK_CULTURE").ok();

        let mut config = Self::new(identity, service_url, shell_url);
        if let Ok(model) = env::var("VAULTLINK_AUTH_MODEL") {
            config.auth_model = match model.to_ascii_lowercase().as_str() {
                "interactive" => AuthModel::Interactive,
                "federated" => AuthModel::Federated,
                other => anyhow::bail!("unknown VAULTLINK_AUTH_MODEL '{other}'"),
            };
        }
        Ok(config)
    }
}

fn required_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing env var {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let identity = AppIdentity::new(Uuid::new_v4(), "test app");
        let config = ClientConfig::new(
            identity,
            Url::parse("https://vault.example/rpc").unwrap(),
            Url::parse("https://shell.example/").unwrap(),
        );
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.auth_model, AuthModel::Interactive);
        assert_eq!(config.refresh_strategy, TokenRefreshStrategy::Matching);
        assert!(!config.identity.multi_record);
    }
}
